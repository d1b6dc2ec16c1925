use thiserror::Error;

/// Enumeration of errors a message handler can report for a single invocation.
/// A handler failure is local to its message: it never aborts sibling
/// invocations in the same batch and never aborts the consumer loop.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("message processing failed: {0}")]
    Failed(String),
}

/// Enumeration of errors related to initialization of the worker process.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
}
