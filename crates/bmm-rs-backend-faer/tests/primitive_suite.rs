use bmm_rs_backend_faer::FaerPrimitive;

bmm_rs_backend_tests::define_primitive_tests!(faer, FaerPrimitive::new);
