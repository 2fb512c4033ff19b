//! Crate-wide error taxonomy (spec.md §7): one `thiserror` enum per
//! component, composed behind a single [`GnssError`] at the boundaries
//! (stream server start, converter configuration) that need to report
//! across more than one subsystem. Individual components keep returning
//! their own narrower error type internally (`nav::NavError`,
//! `raw::ProtocolErrorKind`, `rtcm::RtcmError`, `stream::StreamError`,
//! `config::ConfigError`) — `GnssError` only wraps them for call sites that
//! genuinely cross component boundaries.

use crate::config::ConfigError;
use crate::nav::NavError;
use crate::raw::ProtocolErrorKind;
use crate::rtcm::RtcmError;
use crate::sat::SatError;
use crate::stream::StreamError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GnssError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolErrorKind),

    #[error("navigation store error: {0}")]
    Nav(#[from] NavError),

    #[error("satellite identity error: {0}")]
    Sat(#[from] SatError),

    #[error("RTCM error: {0}")]
    Rtcm(#[from] RtcmError),

    #[error("stream I/O error: {0}")]
    Stream(#[from] StreamError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
