//! Segment lifecycle controller.
//!
//! Turns a continuous presentation timeline into segment boundaries and
//! "segment finalized" notifications into playlist updates, segment
//! encryption and manifest writes.
//!
//! Streaming-side callbacks ([`SegmentController::on_timeline_advance`],
//! [`SegmentController::on_segment_finalized`]) and control-side mutations
//! ([`SegmentController::update_settings`]) share one lock around the
//! controller state. Boundary requests are dispatched after the lock is
//! released so a requester may call back into the controller.
//!
//! Readers that must not wait on segment work (HTTP handlers) use
//! [`SegmentController::published`], a snapshot swapped in after each
//! playlist change under its own short-lived lock.

use crate::config::SinkSettings;
use crate::crypto::SegmentEncryptor;
use crate::error::{Result, SinkError};
use crate::hls::location::SegmentLocation;
use crate::hls::playlist::{Playlist, PlaylistEntry};
use crate::hls::writer;
use crate::metrics;
use crate::sink::boundary::{BoundaryRequest, BoundaryRequester};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What happened to one finalized segment.
///
/// Failures are collected rather than returned: a segment whose encryption
/// or manifest write failed is still counted, and the session goes on.
#[derive(Debug)]
pub struct FinalizedSegment {
    pub sequence_index: u32,
    pub duration: Duration,
    pub url: String,
    pub appended: bool,
    pub encrypted: bool,
    pub manifest_written: bool,
    pub errors: Vec<SinkError>,
}

impl FinalizedSegment {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Point-in-time view of the controller, for health reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub media_sequence: u64,
    pub entries: usize,
    pub end_of_stream: bool,
    pub next_index: u32,
    pub awaiting_boundary: bool,
    pub last_boundary: Duration,
    pub session_active: bool,
}

/// Playlist as last published, with the manifest already rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedPlaylist {
    pub manifest: Arc<str>,
    pub media_sequence: u64,
    pub entries: usize,
    pub end_of_stream: bool,
}

impl PublishedPlaylist {
    fn of(playlist: &Playlist) -> Self {
        Self {
            manifest: playlist.render().into(),
            media_sequence: playlist.first_sequence_number(),
            entries: playlist.len(),
            end_of_stream: playlist.is_ended(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RenderState {
    started: bool,
    ended: bool,
}

struct ControllerState {
    settings: SinkSettings,
    location: SegmentLocation,
    playlist: Playlist,
    encryptor: SegmentEncryptor,
    last_boundary: Duration,
    awaiting_boundary: bool,
    next_index: u32,
    session_start: Option<DateTime<Utc>>,
    render: RenderState,
    published_files: VecDeque<PathBuf>,
}

/// Owns the playlist for a stream and drives its segment lifecycle.
pub struct SegmentController {
    state: Mutex<ControllerState>,
    published: RwLock<Arc<PublishedPlaylist>>,
    requester: Box<dyn BoundaryRequester>,
}

impl SegmentController {
    /// Build a controller from validated settings.
    pub fn new(settings: SinkSettings, requester: impl BoundaryRequester + 'static) -> Result<Self> {
        let location = settings.validate()?;
        let playlist = new_playlist(&settings);
        let published = RwLock::new(Arc::new(PublishedPlaylist::of(&playlist)));

        Ok(Self {
            state: Mutex::new(ControllerState {
                next_index: settings.start_media_sequence,
                settings,
                location,
                playlist,
                encryptor: SegmentEncryptor::new(),
                last_boundary: Duration::ZERO,
                awaiting_boundary: false,
                session_start: None,
                render: RenderState::default(),
                published_files: VecDeque::new(),
            }),
            published,
            requester: Box::new(requester),
        })
    }

    /// Called as media flows; requests a boundary once `target_duration`
    /// has elapsed since the last one.
    pub fn on_timeline_advance(&self, position: Duration) {
        let request = self.state.lock().due_boundary(position);

        if let Some(request) = request {
            self.dispatch(request, "timer");
        }
    }

    /// An outside party asked for a boundary tagged `sequence_index`.
    ///
    /// The controller holds off its own requests until that boundary is
    /// finalized.
    pub fn on_explicit_boundary_request(&self, sequence_index: u32) {
        let mut state = self.state.lock();
        info!("External boundary request, setting index {}", sequence_index);
        state.next_index = sequence_index;
        state.awaiting_boundary = true;
        metrics::record_boundary_request("external");
    }

    /// The producer closed `file` at `boundary_position` and started the
    /// next segment.
    pub fn on_segment_finalized(&self, file: &Path, boundary_position: Duration) -> FinalizedSegment {
        let (report, request) = {
            let mut state = self.state.lock();
            let outcome = state.finalize(file, boundary_position);
            self.publish(&state);
            outcome
        };

        if let Some(request) = request {
            self.dispatch(request, "timer");
        }

        report
    }

    /// End of stream: close the playlist, or mark a discontinuity when the
    /// manifest is meant to continue in a later session.
    pub fn on_end_of_stream(&self) -> Result<()> {
        let mut state = self.state.lock();
        let result = state.finish_stream();
        self.publish(&state);
        result
    }

    /// Start of a play session: captures the wall clock used for program
    /// date times and loads the encryption key when encryption is on.
    ///
    /// A key that fails to load is reported here; segments are then
    /// published unencrypted with a per-segment error.
    pub fn on_session_start(&self) -> Result<()> {
        let mut state = self.state.lock();
        let now = Utc::now();
        state.session_start = Some(now);
        info!("Session started at {}", now.to_rfc3339());

        if state.settings.encryption.is_enabled() {
            state.load_key()
        } else {
            Ok(())
        }
    }

    /// Stop of a play session: finalizes a manifest that was started but
    /// never ended, then resets the session state.
    pub fn on_session_stop(&self) {
        let mut state = self.state.lock();

        if state.render.started && !state.render.ended {
            // already logged and counted; a stale manifest is all that is left
            let _ = state.finish_stream();
        }

        state.reset();
        self.publish(&state);
        info!("Session stopped");
    }

    /// Apply a settings change from the control side.
    ///
    /// `update` edits a copy; the copy is validated and only then swapped
    /// in. The manifest version only takes effect when the playlist is
    /// next recreated.
    pub fn update_settings(&self, update: impl FnOnce(&mut SinkSettings)) -> Result<()> {
        let mut state = self.state.lock();
        let mut next = state.settings.clone();
        update(&mut next);
        let location = next.validate()?;
        state.apply(next, location);
        self.publish(&state);
        Ok(())
    }

    pub fn settings(&self) -> SinkSettings {
        self.state.lock().settings.clone()
    }

    /// Last published playlist. Never waits on encryption or manifest writes.
    pub fn published(&self) -> Arc<PublishedPlaylist> {
        self.published.read().clone()
    }

    /// Render the current manifest without touching disk.
    pub fn render_manifest(&self) -> String {
        self.state.lock().playlist.render()
    }

    pub fn playlist(&self) -> Playlist {
        self.state.lock().playlist.clone()
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.state.lock();
        ControllerStatus {
            media_sequence: state.playlist.first_sequence_number(),
            entries: state.playlist.len(),
            end_of_stream: state.playlist.is_ended(),
            next_index: state.next_index,
            awaiting_boundary: state.awaiting_boundary,
            last_boundary: state.last_boundary,
            session_active: state.session_start.is_some(),
        }
    }

    /// Called with the state lock held, after the segment's side effects.
    fn publish(&self, state: &ControllerState) {
        *self.published.write() = Arc::new(PublishedPlaylist::of(&state.playlist));
    }

    fn dispatch(&self, request: BoundaryRequest, source: &'static str) {
        info!(
            "Requesting segment boundary, index {} at {:?}",
            request.sequence_index, request.position
        );
        metrics::record_boundary_request(source);
        self.requester.request_boundary(request);
    }
}

impl ControllerState {
    fn due_boundary(&mut self, position: Duration) -> Option<BoundaryRequest> {
        let target = self.settings.target_duration;
        if target.is_zero() || self.awaiting_boundary {
            return None;
        }

        if position.saturating_sub(self.last_boundary) < target {
            return None;
        }

        self.awaiting_boundary = true;
        Some(BoundaryRequest {
            position: self.last_boundary + target,
            sequence_index: self.next_index,
            location: self.location.format(self.next_index),
        })
    }

    fn finalize(
        &mut self,
        file: &Path,
        boundary_position: Duration,
    ) -> (FinalizedSegment, Option<BoundaryRequest>) {
        let index = self.next_index;
        let segment_start = self.last_boundary;

        let duration = boundary_position
            .checked_sub(segment_start)
            .unwrap_or_else(|| {
                warn!(
                    "Segment {} ends at {:?} before it started at {:?}, recording zero duration",
                    index, boundary_position, segment_start
                );
                Duration::ZERO
            });
        self.last_boundary = boundary_position;

        let url = self.entry_url(file);
        let entry = PlaylistEntry::new(url.clone(), duration.as_secs_f64(), index)
            .with_program_date_time(self.program_date_time(segment_start));

        let mut errors = Vec::new();

        let appended = match self.playlist.add_entry(entry) {
            Ok(()) => true,
            Err(e) => {
                warn!("Segment {} not added to playlist: {}", index, e);
                errors.push(e);
                false
            }
        };

        let mut encrypted = false;
        if self.settings.encryption.is_enabled() {
            match self.encryptor.encrypt_segment(file, index) {
                Ok(()) => encrypted = true,
                Err(e) => {
                    error!("Failed to encrypt segment {}: {}", file.display(), e);
                    metrics::record_encryption_failure();
                    errors.push(e);
                }
            }
        }

        let manifest_written = match self.write_manifest() {
            Ok(()) => true,
            Err(e) => {
                errors.push(e);
                false
            }
        };
        self.render.started = true;

        self.retain(file);

        if appended {
            metrics::record_segment_published(duration.as_secs_f64(), self.playlist.len());
        }

        info!(
            "Published segment {} ({:.3}s) as {}",
            index,
            duration.as_secs_f64(),
            url
        );

        // the producer has started a new segment, so we may schedule the next one
        self.awaiting_boundary = false;
        self.next_index = index.wrapping_add(1);
        let request = self.due_boundary(boundary_position);

        let report = FinalizedSegment {
            sequence_index: index,
            duration,
            url,
            appended,
            encrypted,
            manifest_written,
            errors,
        };

        (report, request)
    }

    fn finish_stream(&mut self) -> Result<()> {
        if self.render.ended {
            debug!("Playlist already finalized, ignoring end of stream");
            return Ok(());
        }

        if self.settings.reset_on_stop {
            self.playlist.end();
        } else {
            self.playlist.add_discontinuity_marker();
        }
        self.render.ended = true;

        info!(
            "End of stream, playlist {}",
            if self.settings.reset_on_stop {
                "ended"
            } else {
                "left open with a discontinuity"
            }
        );

        self.write_manifest()
    }

    fn reset(&mut self) {
        if self.settings.reset_on_stop {
            self.next_index = self.settings.start_media_sequence;
            self.playlist = new_playlist(&self.settings);
            self.published_files.clear();
        }

        self.last_boundary = Duration::ZERO;
        self.awaiting_boundary = false;
        self.session_start = None;
        self.render = RenderState::default();
    }

    fn apply(&mut self, next: SinkSettings, location: SegmentLocation) {
        let previous = std::mem::replace(&mut self.settings, next);
        let settings = &self.settings;

        self.location = location;
        self.playlist.set_window_size(settings.playlist_length);
        self.playlist
            .set_encryption(settings.encryption, settings.key_uri.clone());
        self.playlist
            .set_program_date_time_mode(settings.program_date_time_mode);

        if settings.start_discontinuity_sequence != previous.start_discontinuity_sequence {
            self.playlist
                .set_discontinuity_sequence_number(settings.start_discontinuity_sequence);
        }

        if settings.start_media_sequence != previous.start_media_sequence {
            self.next_index = settings.start_media_sequence;
        }

        let key_changed = settings.encryption.is_enabled()
            && (!previous.encryption.is_enabled() || settings.key_location != previous.key_location);
        if key_changed && self.session_start.is_some() {
            // reported inside load_key; segments go out unencrypted until fixed
            let _ = self.load_key();
        }

        debug!("Settings updated: {:?}", self.settings);
    }

    fn load_key(&mut self) -> Result<()> {
        let path = self.settings.key_location.clone();
        self.encryptor.load_key(&path).inspect_err(|e| {
            error!("Encryption key unavailable, segments stay unencrypted: {}", e);
        })
    }

    fn write_manifest(&self) -> Result<()> {
        let contents = self.playlist.render();
        writer::write_manifest(&self.settings.playlist_location, &contents).inspect_err(|e| {
            error!("{}", e);
            metrics::record_manifest_write_failure();
        })
    }

    fn entry_url(&self, file: &Path) -> String {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string_lossy().into_owned());

        match self.settings.playlist_root.as_deref() {
            Some(root) if !root.is_empty() => {
                format!("{}/{}", root.trim_end_matches('/'), name)
            }
            _ => name,
        }
    }

    fn program_date_time(&self, segment_start: Duration) -> Option<DateTime<Utc>> {
        let start = self.session_start?;
        let offset = TimeDelta::from_std(segment_start).ok()?;
        start
            .checked_add_signed(offset)?
            .checked_add_signed(self.settings.program_date_time_shift)
    }

    /// Track published files and delete the oldest beyond `max_files`.
    fn retain(&mut self, file: &Path) {
        let max_files = self.settings.max_files;
        if max_files == 0 {
            return;
        }

        self.published_files.push_back(file.to_path_buf());
        while self.published_files.len() > max_files {
            let Some(old) = self.published_files.pop_front() else {
                break;
            };
            match std::fs::remove_file(&old) {
                Ok(()) => debug!("Removed old segment {}", old.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove old segment {}: {}", old.display(), e),
            }
        }
    }
}

fn new_playlist(settings: &SinkSettings) -> Playlist {
    let mut playlist = Playlist::new(settings.playlist_version, settings.playlist_length);
    playlist.set_encryption(settings.encryption, settings.key_uri.clone());
    playlist.set_program_date_time_mode(settings.program_date_time_mode);
    playlist.set_discontinuity_sequence_number(settings.start_discontinuity_sequence);
    playlist
}
