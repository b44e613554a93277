use bmm_rs_backend_ref_cpu::ReferencePrimitive;

bmm_rs_backend_tests::define_primitive_tests!(ref_cpu, ReferencePrimitive::new);

bmm_rs_backend_tests::define_primitive_tests!(ref_cpu_single_matrix, || {
    ReferencePrimitive::new().with_max_native_batch(1)
});
