#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("bus control channel is closed")]
    ControlDisconnected,
    #[error("bus event channel is closed")]
    EventsDisconnected,
    #[error("bus thread panicked")]
    ThreadPanicked,
}
