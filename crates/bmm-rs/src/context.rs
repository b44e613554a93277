//! Per-invocation execution context threaded through the matmul components.

use crate::env;
use crate::error::PrimitiveResult;
use crate::primitive::GemmPrimitive;

/// Ordered submission queue bound to one primitive.
///
/// Calls are issued one after another; `wait` drains the queue by synchronizing the
/// primitive and marking everything submitted so far as completed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stream {
    submitted: usize,
    completed: usize,
}

impl Stream {
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn pending(&self) -> usize {
        self.submitted - self.completed
    }
}

/// Primitive, stream and batching policy used by a single kernel invocation.
///
/// Contexts are cheap to build and must not be shared between concurrent invocations.
#[derive(Debug)]
pub struct ExecutionContext<'p, P> {
    primitive: &'p P,
    stream: Stream,
    native_batch_limit: Option<usize>,
}

impl<'p, P: GemmPrimitive> ExecutionContext<'p, P> {
    /// Builds a context honouring the `BMMRS_NATIVE_BATCH` environment override.
    pub fn new(primitive: &'p P) -> Self {
        ExecutionContext {
            primitive,
            stream: Stream::default(),
            native_batch_limit: env::native_batch_limit(),
        }
    }

    /// Caps the number of matrices handed to a single primitive call; `1` issues one call
    /// per batch index.
    pub fn with_native_batch_limit(mut self, limit: usize) -> Self {
        self.native_batch_limit = Some(limit.max(1));
        self
    }

    pub fn primitive(&self) -> &'p P {
        self.primitive
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// Effective per-call batch cap: the tighter of the context limit and the primitive's.
    pub fn native_batch(&self) -> usize {
        let native = self.primitive.max_native_batch().max(1);
        match self.native_batch_limit {
            Some(limit) => limit.min(native),
            None => native,
        }
    }

    /// Runs `submit` as the next call on the stream.
    pub(crate) fn submit<F>(&mut self, submit: F) -> PrimitiveResult<()>
    where
        F: FnOnce(&'p P) -> PrimitiveResult<()>,
    {
        self.stream.submitted += 1;
        submit(self.primitive)
    }

    /// Blocks until every submitted call has completed.
    pub fn wait(&mut self) -> PrimitiveResult<()> {
        self.primitive.synchronize()?;
        self.stream.completed = self.stream.submitted;
        Ok(())
    }
}
