//! Sliding-window media playlist model and manifest rendering.
//!
//! The playlist keeps the most recent `window_size` segment entries (all of
//! them when the window is 0) and renders them to HLS manifest text:
//!
//! ```text
//! #EXTM3U
//! #EXT-X-VERSION:3
//! #EXT-X-MEDIA-SEQUENCE:1
//! #EXT-X-TARGETDURATION:4
//! #EXT-X-KEY:METHOD=AES-128,URI="playlist.key"
//!
//! #EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:04.000Z
//! #EXTINF:4.000000,
//! segment00001.ts
//! ```

use crate::error::{Result, SinkError};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt::Write;

/// Manifest syntax version written by default.
pub const DEFAULT_PLAYLIST_VERSION: u32 = 3;

/// Segment encryption method advertised in `#EXT-X-KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMethod {
    #[default]
    None,
    Aes128,
}

impl EncryptionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMethod::None => "NONE",
            EncryptionMethod::Aes128 => "AES-128",
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self != EncryptionMethod::None
    }
}

/// When to emit `#EXT-X-PROGRAM-DATE-TIME` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgramDateTimeMode {
    #[default]
    Never,
    /// Oldest retained entry, plus any entry following a discontinuity
    FirstSegmentOnly,
    EverySegment,
}

/// One segment's manifest record.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub url: String,
    pub title: Option<String>,
    /// Seconds, never negative
    pub duration: f64,
    pub sequence_index: u32,
    pub discontinuous: bool,
    pub program_date_time: Option<DateTime<Utc>>,
}

impl PlaylistEntry {
    pub fn new(url: impl Into<String>, duration: f64, sequence_index: u32) -> Self {
        Self {
            url: url.into(),
            title: None,
            duration: duration.max(0.0),
            sequence_index,
            discontinuous: false,
            program_date_time: None,
        }
    }

    pub fn with_program_date_time(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.program_date_time = at;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Authoritative manifest state.
#[derive(Debug, Clone)]
pub struct Playlist {
    version: u32,
    window_size: usize,
    entries: VecDeque<PlaylistEntry>,
    /// Sequence number a brand-new entry would receive
    media_sequence_number: u64,
    discontinuity_sequence_number: u64,
    pending_discontinuity: bool,
    end_of_stream: bool,
    encryption: EncryptionMethod,
    key_uri: String,
    program_date_time_mode: ProgramDateTimeMode,
}

impl Playlist {
    pub fn new(version: u32, window_size: usize) -> Self {
        Self {
            version,
            window_size,
            entries: VecDeque::new(),
            media_sequence_number: 0,
            discontinuity_sequence_number: 0,
            pending_discontinuity: false,
            end_of_stream: false,
            encryption: EncryptionMethod::None,
            key_uri: String::new(),
            program_date_time_mode: ProgramDateTimeMode::Never,
        }
    }

    /// Append a finalized segment, evicting from the front first so the
    /// window never exceeds its capacity.
    ///
    /// # Errors
    /// [`SinkError::EndOfStream`] once the playlist has been ended; the
    /// entries are left untouched.
    pub fn add_entry(&mut self, mut entry: PlaylistEntry) -> Result<()> {
        if self.end_of_stream {
            return Err(SinkError::EndOfStream);
        }

        if self.window_size > 0 {
            while self.entries.len() >= self.window_size {
                self.entries.pop_front();
            }
        }

        if self.pending_discontinuity {
            entry.discontinuous = true;
            self.pending_discontinuity = false;
        }

        self.media_sequence_number = u64::from(entry.sequence_index) + 1;
        self.entries.push_back(entry);

        Ok(())
    }

    /// Flag the next appended entry as discontinuous.
    pub fn add_discontinuity_marker(&mut self) {
        self.pending_discontinuity = true;
        self.discontinuity_sequence_number += 1;
    }

    /// Mark the playlist as complete; no more entries may be appended.
    pub fn end(&mut self) {
        self.end_of_stream = true;
    }

    pub fn set_window_size(&mut self, window_size: usize) {
        self.window_size = window_size;
        if window_size > 0 {
            while self.entries.len() > window_size {
                self.entries.pop_front();
            }
        }
    }

    pub fn set_encryption(&mut self, method: EncryptionMethod, key_uri: impl Into<String>) {
        self.encryption = method;
        self.key_uri = key_uri.into();
    }

    pub fn set_program_date_time_mode(&mut self, mode: ProgramDateTimeMode) {
        self.program_date_time_mode = mode;
    }

    pub fn set_discontinuity_sequence_number(&mut self, value: u64) {
        self.discontinuity_sequence_number = value;
    }

    pub fn entries(&self) -> impl ExactSizeIterator<Item = &PlaylistEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn media_sequence_number(&self) -> u64 {
        self.media_sequence_number
    }

    /// Sequence number of the oldest retained entry, as advertised in
    /// `#EXT-X-MEDIA-SEQUENCE`.
    pub fn first_sequence_number(&self) -> u64 {
        self.media_sequence_number
            .saturating_sub(self.entries.len() as u64)
    }

    pub fn discontinuity_sequence_number(&self) -> u64 {
        self.discontinuity_sequence_number
    }

    pub fn is_ended(&self) -> bool {
        self.end_of_stream
    }

    /// `#EXT-X-TARGETDURATION` for the current window.
    ///
    /// The longest retained duration is rounded to the nearest half second
    /// and then up to a whole second, so `[3.2, 4.8]` gives 5 and plain 4 s
    /// segments give 4. GStreamer's hlssink uses `ceil(max + 0.5)` instead
    /// (6 and 5 for those cases); this rule deliberately differs and must
    /// not be changed back. Recomputed on every render, so it can shrink once
    /// a long segment leaves the window.
    pub fn target_duration(&self) -> u64 {
        let longest = self
            .entries
            .iter()
            .map(|entry| entry.duration)
            .fold(0.0_f64, f64::max);

        let half_seconds = (longest * 2.0).round() / 2.0;
        half_seconds.ceil() as u64
    }

    /// Render the manifest text. Identical state always renders identical
    /// bytes, and an empty window still yields a parseable header.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(128 + self.entries.len() * 96);

        out.push_str("#EXTM3U\n");
        let _ = writeln!(out, "#EXT-X-VERSION:{}", self.version);
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.first_sequence_number());
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration());

        if self.encryption.is_enabled() {
            let _ = writeln!(
                out,
                "#EXT-X-KEY:METHOD={},URI=\"{}\"",
                self.encryption.as_str(),
                self.key_uri
            );
        }

        out.push('\n');

        for (position, entry) in self.entries.iter().enumerate() {
            if entry.discontinuous {
                out.push_str("#EXT-X-DISCONTINUITY\n");
            }

            if self.shows_program_date_time(position, entry)
                && let Some(at) = entry.program_date_time
            {
                let _ = writeln!(
                    out,
                    "#EXT-X-PROGRAM-DATE-TIME:{}",
                    at.format("%Y-%m-%dT%H:%M:%S%.3fZ")
                );
            }

            let title = entry.title.as_deref().unwrap_or("");
            if self.version < 3 {
                let _ = writeln!(out, "#EXTINF:{},{}", (entry.duration + 0.5) as u64, title);
            } else {
                let _ = writeln!(out, "#EXTINF:{:.6},{}", entry.duration, title);
            }

            out.push_str(&entry.url);
            out.push('\n');
        }

        if self.end_of_stream {
            out.push_str("#EXT-X-ENDLIST\n");
        }

        out
    }

    fn shows_program_date_time(&self, position: usize, entry: &PlaylistEntry) -> bool {
        match self.program_date_time_mode {
            ProgramDateTimeMode::Never => false,
            ProgramDateTimeMode::FirstSegmentOnly => position == 0 || entry.discontinuous,
            ProgramDateTimeMode::EverySegment => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(index: u32, duration: f64) -> PlaylistEntry {
        PlaylistEntry::new(format!("segment{:05}.ts", index), duration, index)
    }

    fn retained_indices(playlist: &Playlist) -> Vec<u32> {
        playlist.entries().map(|e| e.sequence_index).collect()
    }

    #[test]
    fn sliding_window_keeps_most_recent() {
        let mut playlist = Playlist::new(3, 3);
        for i in 0..4 {
            playlist.add_entry(entry(i, 4.0)).unwrap();
        }

        assert_eq!(retained_indices(&playlist), vec![1, 2, 3]);
        assert_eq!(playlist.media_sequence_number(), 4);
        assert!(playlist.render().contains("#EXT-X-MEDIA-SEQUENCE:1\n"));
    }

    #[test]
    fn window_bound_holds_for_many_sizes() {
        for window in 1..8usize {
            let mut playlist = Playlist::new(3, window);
            for i in 0..20u32 {
                playlist.add_entry(entry(i, 2.0)).unwrap();
                assert!(playlist.len() <= window);
                assert_eq!(
                    playlist.first_sequence_number(),
                    u64::from(playlist.entries().next().unwrap().sequence_index)
                );
            }

            let expected: Vec<u32> = (20 - window as u32..20).collect();
            assert_eq!(retained_indices(&playlist), expected);
        }
    }

    #[test]
    fn unbounded_window_grows() {
        let mut playlist = Playlist::new(3, 0);
        for i in 0..50 {
            playlist.add_entry(entry(i, 1.0)).unwrap();
        }
        assert_eq!(playlist.len(), 50);
        assert_eq!(playlist.first_sequence_number(), 0);
    }

    #[test]
    fn add_after_end_is_rejected() {
        let mut playlist = Playlist::new(3, 5);
        playlist.add_entry(entry(0, 4.0)).unwrap();
        playlist.end();

        let result = playlist.add_entry(entry(1, 4.0));
        assert!(matches!(result, Err(SinkError::EndOfStream)));
        assert_eq!(retained_indices(&playlist), vec![0]);
        assert_eq!(playlist.media_sequence_number(), 1);
    }

    #[test]
    fn target_duration_rounds_to_half_second_then_up() {
        let mut playlist = Playlist::new(3, 0);
        playlist.add_entry(entry(0, 3.2)).unwrap();
        playlist.add_entry(entry(1, 4.8)).unwrap();
        assert!(playlist.render().contains("#EXT-X-TARGETDURATION:5\n"));

        let mut playlist = Playlist::new(3, 0);
        playlist.add_entry(entry(0, 4.3)).unwrap();
        assert_eq!(playlist.target_duration(), 5);

        let mut playlist = Playlist::new(3, 0);
        playlist.add_entry(entry(0, 4.2)).unwrap();
        assert_eq!(playlist.target_duration(), 4);

        let mut playlist = Playlist::new(3, 0);
        playlist.add_entry(entry(0, 4.0)).unwrap();
        assert_eq!(playlist.target_duration(), 4);
    }

    #[test]
    fn target_duration_shrinks_when_long_segment_leaves_window() {
        let mut playlist = Playlist::new(3, 2);
        playlist.add_entry(entry(0, 9.0)).unwrap();
        playlist.add_entry(entry(1, 2.0)).unwrap();
        assert_eq!(playlist.target_duration(), 9);

        playlist.add_entry(entry(2, 2.0)).unwrap();
        assert_eq!(playlist.target_duration(), 2);
    }

    #[test]
    fn empty_playlist_renders_header() {
        let playlist = Playlist::new(3, 5);
        assert_eq!(
            playlist.render(),
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-TARGETDURATION:0\n\n"
        );
    }

    #[test]
    fn full_render_layout() {
        let mut playlist = Playlist::new(3, 5);
        playlist.set_encryption(EncryptionMethod::Aes128, "https://keys.example.com/k");
        playlist.add_entry(entry(0, 4.0)).unwrap();
        playlist.add_entry(entry(1, 3.5).with_title("intro")).unwrap();
        playlist.end();

        let expected = "#EXTM3U\n\
            #EXT-X-VERSION:3\n\
            #EXT-X-MEDIA-SEQUENCE:0\n\
            #EXT-X-TARGETDURATION:4\n\
            #EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.example.com/k\"\n\
            \n\
            #EXTINF:4.000000,\n\
            segment00000.ts\n\
            #EXTINF:3.500000,intro\n\
            segment00001.ts\n\
            #EXT-X-ENDLIST\n";
        assert_eq!(playlist.render(), expected);
    }

    #[test]
    fn legacy_version_uses_integer_durations() {
        let mut playlist = Playlist::new(2, 0);
        playlist.add_entry(entry(0, 3.6)).unwrap();
        playlist.add_entry(entry(1, 3.4)).unwrap();

        let text = playlist.render();
        assert!(text.contains("#EXTINF:4,\nsegment00000.ts"));
        assert!(text.contains("#EXTINF:3,\nsegment00001.ts"));
    }

    #[test]
    fn render_is_deterministic() {
        let mut playlist = Playlist::new(3, 3);
        playlist.set_program_date_time_mode(ProgramDateTimeMode::EverySegment);
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        for i in 0..5 {
            let at = start + chrono::TimeDelta::seconds(i64::from(i) * 4);
            playlist
                .add_entry(entry(i, 4.0).with_program_date_time(Some(at)))
                .unwrap();
        }

        assert_eq!(playlist.render(), playlist.clone().render());
    }

    #[test]
    fn discontinuity_marks_next_entry() {
        let mut playlist = Playlist::new(3, 0);
        playlist.add_entry(entry(0, 4.0)).unwrap();
        playlist.add_discontinuity_marker();
        assert_eq!(playlist.discontinuity_sequence_number(), 1);

        playlist.add_entry(entry(1, 4.0)).unwrap();
        playlist.add_entry(entry(2, 4.0)).unwrap();

        let flags: Vec<bool> = playlist.entries().map(|e| e.discontinuous).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert!(
            playlist
                .render()
                .contains("#EXT-X-DISCONTINUITY\n#EXTINF:4.000000,\nsegment00001.ts")
        );
    }

    #[test]
    fn program_date_time_modes() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let build = |mode| {
            let mut playlist = Playlist::new(3, 0);
            playlist.set_program_date_time_mode(mode);
            for i in 0..3u32 {
                if i == 2 {
                    playlist.add_discontinuity_marker();
                }
                let at = start + chrono::TimeDelta::milliseconds(i64::from(i) * 4_250);
                playlist
                    .add_entry(entry(i, 4.25).with_program_date_time(Some(at)))
                    .unwrap();
            }
            playlist.render()
        };

        let never = build(ProgramDateTimeMode::Never);
        assert!(!never.contains("PROGRAM-DATE-TIME"));

        let first = build(ProgramDateTimeMode::FirstSegmentOnly);
        assert_eq!(first.matches("#EXT-X-PROGRAM-DATE-TIME").count(), 2);
        assert!(first.contains("#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00.000Z\n"));
        assert!(first.contains("#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:08.500Z\n"));

        let all = build(ProgramDateTimeMode::EverySegment);
        assert_eq!(all.matches("#EXT-X-PROGRAM-DATE-TIME").count(), 3);
        assert!(all.contains("#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:04.250Z\n"));
    }

    #[test]
    fn shrinking_window_evicts_immediately() {
        let mut playlist = Playlist::new(3, 5);
        for i in 0..5 {
            playlist.add_entry(entry(i, 1.0)).unwrap();
        }
        playlist.set_window_size(2);
        assert_eq!(retained_indices(&playlist), vec![3, 4]);
        assert_eq!(playlist.first_sequence_number(), 3);
    }

    #[test]
    fn negative_duration_is_clamped() {
        let e = PlaylistEntry::new("a.ts", -1.5, 0);
        assert_eq!(e.duration, 0.0);
    }
}
