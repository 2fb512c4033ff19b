//! GNSS real-time stream ingest, multi-protocol decode and format-conversion toolkit.
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

/*
 * gnss-rt is part of the rtk-rs framework.
 * Authors: nav-solutions contributors
 * This framework is shipped under Mozilla Public V2 license.
 */

extern crate gnss_rs as gnss;

pub mod bits;
pub mod config;
pub mod converter;
pub mod error;
pub mod nav;
pub mod obs;
pub mod raw;
pub mod rtcm;
pub mod sat;
pub mod server;
pub mod solution;
pub mod station;
pub mod stream;
pub mod time;

pub mod prelude {
    pub use crate::config::{Config, ConfigError, ConsoleTimeType, StreamSpec};
    pub use crate::converter::{Converter, MessageSpec, OutputFormat, StationSource};
    pub use crate::error::GnssError;
    pub use crate::nav::{Eph, GEph, GalileoSet, Nav, NavError, NavOptions, SEph};
    pub use crate::obs::{BandObs, Lli, ObsBuf, Observation};
    pub use crate::raw::{DecodeEvent, ProtocolErrorKind, RawContext, RawDecoder, RawOptions};
    pub use crate::rtcm::{Rtcm3Decoder, RtcmContext, RtcmError};
    pub use crate::sat::{code2obs, obs2code, sat_no, sat_sys, CodePriority, ObsCode, SatError, SatId, System};
    pub use crate::server::{ServerError, ServerStatus, StreamServer, StreamServerHandle};
    pub use crate::solution::{gpgga, Sol, SolBuf, SolQuality, SolReader};
    pub use crate::station::{ecef_to_geodetic, geodetic_to_ecef, AntennaOffsetFrame, Station};
    pub use crate::stream::{build_stream, build_stream_from_url, Mode, Stat, Stream, StreamError, StreamKind, StreamState};
    pub use crate::time::{
        adjday, adjweek, bdt_to_gps, epoch_to_time, gps_to_bdt, gps_to_time, gps_to_utc,
        time_to_epoch, time_to_gps, utc_to_gps, Tick, Time, TimeError, TimeSystem,
    };

    pub use gnss::constellation::Constellation;
}
