use wb_queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}
