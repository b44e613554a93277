use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use bmm_rs::primitive::{GemmCall, GemmPrimitive, StridedMatrix};
use bmm_rs::{Element, PrimitiveError, PrimitiveResult};

/// Geometry of one primitive call as seen by the wrapped primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub batch: usize,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f32,
    pub lhs: StridedMatrix,
    pub rhs: StridedMatrix,
    pub out: StridedMatrix,
    pub has_residual: bool,
}

/// Test-only primitive that records every call before forwarding it to `inner`.
///
/// A failure can be injected at a given call index; the failing call is recorded but not
/// forwarded.
#[derive(Debug)]
pub struct RecordingPrimitive<P> {
    inner: P,
    max_native_batch: Option<usize>,
    fail_at: Option<usize>,
    calls: Mutex<Vec<RecordedCall>>,
    synchronized: AtomicUsize,
}

impl<P: GemmPrimitive> RecordingPrimitive<P> {
    pub fn new(inner: P) -> Self {
        RecordingPrimitive {
            inner,
            max_native_batch: None,
            fail_at: None,
            calls: Mutex::new(Vec::new()),
            synchronized: AtomicUsize::new(0),
        }
    }

    /// Overrides the batch capacity advertised to the executor.
    pub fn with_max_native_batch(mut self, max_native_batch: usize) -> Self {
        self.max_native_batch = Some(max_native_batch);
        self
    }

    /// Makes the call with index `call_index` (0-based) fail.
    pub fn failing_at(mut self, call_index: usize) -> Self {
        self.fail_at = Some(call_index);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("recording mutex poisoned").clone()
    }

    pub fn synchronize_count(&self) -> usize {
        self.synchronized.load(Ordering::SeqCst)
    }
}

impl<P: GemmPrimitive> GemmPrimitive for RecordingPrimitive<P> {
    fn name(&self) -> &str {
        "recording"
    }

    fn max_native_batch(&self) -> usize {
        self.max_native_batch
            .unwrap_or_else(|| self.inner.max_native_batch())
    }

    fn gemm<X: Element, O: Element>(&self, call: GemmCall<'_, X, O>) -> PrimitiveResult<()> {
        let index = {
            let mut calls = self.calls.lock().expect("recording mutex poisoned");
            calls.push(RecordedCall {
                batch: call.batch,
                m: call.m,
                n: call.n,
                k: call.k,
                alpha: call.alpha,
                lhs: call.lhs.layout,
                rhs: call.rhs.layout,
                out: call.out_layout,
                has_residual: call.residual.is_some(),
            });
            calls.len() - 1
        };
        if self.fail_at == Some(index) {
            return Err(PrimitiveError::new(format!("injected failure at call {index}")));
        }
        self.inner.gemm(call)
    }

    fn synchronize(&self) -> PrimitiveResult<()> {
        self.synchronized.fetch_add(1, Ordering::SeqCst);
        self.inner.synchronize()
    }
}
