use crate::{config, frame, mlme, service};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] config::Error),
    #[error("frame error: {0}")]
    Frame(#[from] frame::Error),
    #[error("mlme error: {0}")]
    Mlme(#[from] mlme::Error),
    #[error("service error: {0}")]
    Service(#[from] service::Error),
}
