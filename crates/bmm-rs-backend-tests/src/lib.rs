pub mod oracle;
pub mod recording_primitive;
pub mod smoke;

/// Instantiates the shared conformance suite for a primitive constructor.
#[macro_export]
macro_rules! define_primitive_tests {
    ($module:ident, $primitive_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            use super::*;

            use $crate::smoke;

            macro_rules! smoke_test {
                ($name:ident) => {
                    #[test]
                    fn $name() {
                        let primitive = ($primitive_ctor)();
                        smoke::$name(&primitive);
                    }
                };
            }

            smoke_test!(matmul_matches_expected);
            smoke_test!(broadcast_batches_match_oracle);
            smoke_test!(transposed_operands_match_oracle);
            smoke_test!(vector_operands_follow_numpy_rules);
            smoke_test!(alpha_and_residual_are_applied);
            smoke_test!(single_matrix_calls_match_native_batch);
            smoke_test!(reduced_precision_outputs);
            smoke_test!(fused_input_matches_materialized);
            smoke_test!(fused_output_is_permuted);
            smoke_test!(gradients_match_oracle);
            smoke_test!(strided_call_layouts);
            smoke_test!(out_of_bounds_call_is_rejected);
        }
    };
}
