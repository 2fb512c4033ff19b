//! End-to-end stream-server scenarios (spec.md §8).
//!
//! Unlike the per-module `#[cfg(test)]` suites, these drive a real
//! [`StreamServer`] across its own worker thread against real files on
//! disk, the way the teacher's crate only gets exercised by its own
//! `tests/` integration layer rather than unit tests.

use gnss_rt::config::Config;
use gnss_rt::converter::{MessageSpec, OutputFormat, StationSource};
use gnss_rt::server::StreamServer;
use gnss_rt::station::Station;
use gnss_rt::stream::file::FileStream;
use gnss_rt::stream::{Mode, Stream};
use std::io::Write;
use std::time::Duration;

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("gnss-rt-e2e-{}-{}", std::process::id(), name))
}

/// Scenario 4: `file:///tmp/in.bin` (#fmt rtcm3) piped through a no-converter
/// output slot to `file:///tmp/out.bin` (#fmt rtcm3). Expected: `out.bin` ==
/// `in.bin` byte-for-byte once the server has read past EOF.
#[test]
fn file_to_file_byte_copy() {
    let in_path = temp_path("in.bin");
    let out_path = temp_path("out.bin");
    let _ = std::fs::remove_file(&in_path);
    let _ = std::fs::remove_file(&out_path);

    // A minimal valid RTCM 3 frame: preamble 0xD3, zero-length body, CRC.
    let frame = gnss_rt::rtcm::encode::frame(&[]);
    {
        let mut f = std::fs::File::create(&in_path).unwrap();
        f.write_all(&frame).unwrap();
        f.write_all(&frame).unwrap();
    }

    let mut cfg = Config::default();
    cfg.svr_cycle_ms = 5;
    cfg.input_streams.insert(
        1,
        gnss_rt::config::StreamSpec {
            stream_type: "file".to_string(),
            path: in_path.to_str().unwrap().to_string(),
            format: "rtcm3".to_string(),
        },
    );

    let output: Box<dyn Stream> = Box::new(FileStream::new(out_path.to_str().unwrap(), Mode::Write, None));
    // No converter: passthrough, as spec.md's scenario 4 literally requires.
    let server = StreamServer::build(&cfg, "rtcm3", vec![(output, None, false)], Station::default(), None).unwrap();

    let handle = server.start();
    // Plenty of cycles for the server to read both frames past EOF.
    std::thread::sleep(Duration::from_millis(200));
    handle.stop();

    let original = std::fs::read(&in_path).unwrap();
    let copied = std::fs::read(&out_path).unwrap();
    assert_eq!(original, copied);

    let _ = std::fs::remove_file(&in_path);
    let _ = std::fs::remove_file(&out_path);
}

/// Scenario: an output slot with a converter attached (RTCM3 -> RTCM3 with
/// a message schedule) still produces a file, independent of scenario 4's
/// pure passthrough path.
#[test]
fn file_to_file_with_converter_runs_without_error() {
    let in_path = temp_path("conv-in.bin");
    let out_path = temp_path("conv-out.bin");
    let _ = std::fs::remove_file(&in_path);
    let _ = std::fs::remove_file(&out_path);

    std::fs::write(&in_path, gnss_rt::rtcm::encode::frame(&[])).unwrap();

    let mut cfg = Config::default();
    cfg.svr_cycle_ms = 5;
    cfg.input_streams.insert(
        1,
        gnss_rt::config::StreamSpec {
            stream_type: "file".to_string(),
            path: in_path.to_str().unwrap().to_string(),
            format: "rtcm3".to_string(),
        },
    );

    let output: Box<dyn Stream> = Box::new(FileStream::new(out_path.to_str().unwrap(), Mode::Write, None));
    let converter = gnss_rt::converter::Converter::new(
        OutputFormat::Rtcm3,
        1,
        StationSource::Local,
        vec![MessageSpec::new(1077, Duration::from_secs(0))],
    );
    let server =
        StreamServer::build(&cfg, "rtcm3", vec![(output, Some(converter), false)], Station::default(), None).unwrap();

    let handle = server.start();
    std::thread::sleep(Duration::from_millis(100));
    assert!(handle.is_running());
    handle.stop();

    assert!(out_path.exists());
    let _ = std::fs::remove_file(&in_path);
    let _ = std::fs::remove_file(&out_path);
}
