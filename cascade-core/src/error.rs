//! Error taxonomy. Everything here is fatal: configuration and graph
//! problems abort initialization, optimizer problems abort the run only when
//! `optimization_problems_fatal` is set (or on invalid arguments).

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("graph consistency error: {0}")]
    Graph(String),
    #[error("optimization failure: {0}")]
    Optimizer(String),
}
