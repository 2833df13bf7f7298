//! Lifecycle tests for the segment controller.
//!
//! Drives a controller the way a live producer would: timeline ticks,
//! boundary requests, finalized segment files on disk. The manifests it
//! writes are checked with an independent HLS parser.

use hlsink::config::SinkSettings;
use hlsink::crypto::decrypt_segment;
use hlsink::hls::EncryptionMethod;
use hlsink::sink::{BoundaryRequest, SegmentController};
use m3u8_rs::{MediaPlaylist, Playlist};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const KEY: [u8; 16] = [0x5a; 16];

/// Simulated producer: cuts a segment whenever the controller asks.
struct Producer {
    dir: TempDir,
    controller: Arc<SegmentController>,
    requests: Arc<Mutex<Vec<BoundaryRequest>>>,
}

impl Producer {
    fn new(configure: impl FnOnce(&mut SinkSettings, &Path)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = SinkSettings {
            playlist_location: dir.path().join("playlist.m3u8"),
            key_location: dir.path().join("playlist.key"),
            target_duration: Duration::from_secs(4),
            playlist_length: 3,
            max_files: 0,
            ..Default::default()
        };
        configure(&mut settings, dir.path());

        let requests: Arc<Mutex<Vec<BoundaryRequest>>> = Arc::default();
        let sink = requests.clone();
        let controller = SegmentController::new(settings, move |r: BoundaryRequest| {
            sink.lock().unwrap().push(r)
        })
        .unwrap();

        Self {
            dir,
            controller: Arc::new(controller),
            requests,
        }
    }

    /// Advance in 40 ms frames up to `until`, closing a segment whenever a
    /// boundary request is pending.
    fn play(&self, from: Duration, until: Duration) {
        let frame = Duration::from_millis(40);
        let mut position = from;
        while position <= until {
            self.controller.on_timeline_advance(position);

            let pending = self.requests.lock().unwrap().pop();
            if let Some(request) = pending {
                let path = self.dir.path().join(&request.location);
                std::fs::write(&path, segment_payload(request.sequence_index)).unwrap();
                let report = self.controller.on_segment_finalized(&path, position);
                assert!(report.is_clean(), "{:?}", report.errors);
                assert_eq!(report.sequence_index, request.sequence_index);
            }

            position += frame;
        }
    }

    fn manifest(&self) -> MediaPlaylist {
        let bytes = std::fs::read(self.dir.path().join("playlist.m3u8")).unwrap();
        match m3u8_rs::parse_playlist_res(&bytes) {
            Ok(Playlist::MediaPlaylist(playlist)) => playlist,
            Ok(Playlist::MasterPlaylist(_)) => panic!("expected a media playlist"),
            Err(e) => panic!("manifest does not parse: {:?}", e),
        }
    }
}

fn segment_payload(index: u32) -> Vec<u8> {
    format!("segment {index} ").repeat(100).into_bytes()
}

#[test]
fn live_window_slides_with_boundaries() {
    let producer = Producer::new(|_, _| {});
    producer.controller.on_session_start().unwrap();
    producer.play(Duration::ZERO, Duration::from_secs(21));

    let manifest = producer.manifest();
    assert_eq!(manifest.segments.len(), 3);
    assert_eq!(manifest.media_sequence, 2);
    assert!(!manifest.end_list);

    let uris: Vec<&str> = manifest.segments.iter().map(|s| s.uri.as_str()).collect();
    assert_eq!(uris, ["segment00002.ts", "segment00003.ts", "segment00004.ts"]);
    for segment in &manifest.segments {
        assert!((segment.duration - 4.0).abs() < 0.05, "{}", segment.duration);
    }
}

#[test]
fn end_of_stream_closes_manifest() {
    let producer = Producer::new(|_, _| {});
    producer.controller.on_session_start().unwrap();
    producer.play(Duration::ZERO, Duration::from_secs(9));
    producer.controller.on_end_of_stream().unwrap();
    producer.controller.on_session_stop();

    let manifest = producer.manifest();
    assert!(manifest.end_list);
    assert_eq!(manifest.segments.len(), 2);
    assert_eq!(manifest.media_sequence, 0);
}

#[test]
fn restart_without_reset_marks_discontinuity() {
    let producer = Producer::new(|s, _| s.reset_on_stop = false);

    producer.controller.on_session_start().unwrap();
    producer.play(Duration::ZERO, Duration::from_secs(5));
    producer.controller.on_end_of_stream().unwrap();
    producer.controller.on_session_stop();

    producer.controller.on_session_start().unwrap();
    producer.play(Duration::ZERO, Duration::from_secs(5));

    let manifest = producer.manifest();
    assert!(!manifest.end_list);
    let uris: Vec<&str> = manifest.segments.iter().map(|s| s.uri.as_str()).collect();
    assert_eq!(uris, ["segment00000.ts", "segment00001.ts"]);
    assert!(!manifest.segments[0].discontinuity);
    assert!(manifest.segments[1].discontinuity);
    assert_eq!(producer.controller.playlist().discontinuity_sequence_number(), 1);
}

#[test]
fn encrypted_segments_decrypt_with_their_index() {
    let producer = Producer::new(|s, dir| {
        std::fs::write(dir.join("playlist.key"), KEY).unwrap();
        s.encryption = EncryptionMethod::Aes128;
        s.key_uri = "https://keys.example.com/live.key".to_string();
        s.start_media_sequence = 100;
    });
    producer.controller.on_session_start().unwrap();
    producer.play(Duration::ZERO, Duration::from_secs(9));

    let manifest = producer.manifest();
    assert_eq!(manifest.media_sequence, 100);
    assert_eq!(manifest.segments.len(), 2);

    for (offset, segment) in manifest.segments.iter().enumerate() {
        let index = 100 + offset as u32;
        let ciphertext = std::fs::read(producer.dir.path().join(&segment.uri)).unwrap();
        assert_eq!(ciphertext.len() % 16, 0);
        let plaintext = decrypt_segment(&ciphertext, &KEY, index).unwrap();
        assert_eq!(plaintext, segment_payload(index));
    }

    let text = std::fs::read_to_string(producer.dir.path().join("playlist.m3u8")).unwrap();
    assert!(text.contains("#EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.example.com/live.key\"\n"));
}

#[test]
fn controller_is_shared_across_threads() {
    let producer = Producer::new(|s, _| s.playlist_length = 0);
    let controller = producer.controller.clone();

    let settings_thread = std::thread::spawn(move || {
        for length in [0, 10, 0, 20] {
            controller
                .update_settings(|s| s.playlist_length = length)
                .unwrap();
        }
    });

    producer.play(Duration::ZERO, Duration::from_secs(13));
    settings_thread.join().unwrap();

    let manifest = producer.manifest();
    assert_eq!(manifest.segments.len(), 3);
    assert_eq!(manifest.media_sequence, 0);
}
