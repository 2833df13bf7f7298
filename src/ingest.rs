//! Segment list ingest.
//!
//! Drives the controller from the CSV segment list common segmenters emit
//! while they run (`filename,start_seconds,end_seconds`, one line per closed
//! segment). Blank lines and `#` comments are ignored; malformed lines are
//! reported and skipped.

use crate::error::{Result, SinkError};
use crate::sink::SegmentController;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// One closed segment as announced by the producer.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub file: PathBuf,
    pub start: Duration,
    pub end: Duration,
}

/// Counts reported once the list ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub segments: usize,
    pub skipped: usize,
}

/// Parse a single CSV record. Returns `Ok(None)` for blank and comment lines.
///
/// The file name may itself contain commas; the last two fields are always
/// the timestamps.
pub fn parse_segment_record(line: &str) -> Result<Option<SegmentRecord>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.rsplitn(3, ',');
    let (Some(end), Some(start), Some(file)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(SinkError::InvalidSegmentRecord(format!(
            "expected filename,start,end: '{}'",
            line
        )));
    };

    let file = file.trim();
    if file.is_empty() {
        return Err(SinkError::InvalidSegmentRecord(format!(
            "missing filename: '{}'",
            line
        )));
    }

    let start = parse_seconds(start, line)?;
    let end = parse_seconds(end, line)?;
    if end < start {
        return Err(SinkError::InvalidSegmentRecord(format!(
            "segment ends before it starts: '{}'",
            line
        )));
    }

    Ok(Some(SegmentRecord {
        file: PathBuf::from(file),
        start,
        end,
    }))
}

fn parse_seconds(field: &str, line: &str) -> Result<Duration> {
    let secs: f64 = field.trim().parse().map_err(|e| {
        SinkError::InvalidSegmentRecord(format!("bad timestamp '{}' in '{}': {}", field, line, e))
    })?;

    Duration::try_from_secs_f64(secs).map_err(|e| {
        SinkError::InvalidSegmentRecord(format!("bad timestamp '{}' in '{}': {}", field, line, e))
    })
}

/// Feed every record from `reader` to the controller, then signal end of
/// stream.
///
/// Relative file names resolve against `output_dir`. Controller calls run
/// on the blocking pool since finalizing a segment may encrypt it.
pub async fn run<R>(
    reader: R,
    controller: Arc<SegmentController>,
    output_dir: &Path,
) -> Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = IngestSummary::default();

    while let Some(line) = lines.next_line().await? {
        let record = match parse_segment_record(&line) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping segment record: {}", e);
                summary.skipped += 1;
                continue;
            }
        };

        let file = output_dir.join(&record.file);
        let controller = controller.clone();
        let report = tokio::task::spawn_blocking(move || {
            controller.on_timeline_advance(record.end);
            controller.on_segment_finalized(&file, record.end)
        })
        .await
        .map_err(|e| SinkError::Io(std::io::Error::other(e)))?;

        for e in &report.errors {
            warn!("Segment {} published with error: {}", report.sequence_index, e);
        }
        summary.segments += 1;
    }

    info!(
        "Segment list ended after {} segments ({} skipped)",
        summary.segments, summary.skipped
    );

    tokio::task::spawn_blocking(move || controller.on_end_of_stream())
        .await
        .map_err(|e| SinkError::Io(std::io::Error::other(e)))??;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkSettings;
    use crate::sink::IgnoreRequests;

    #[test]
    fn parses_plain_record() {
        let record = parse_segment_record("segment00003.ts,12.000000,16.016000")
            .unwrap()
            .unwrap();
        assert_eq!(record.file, PathBuf::from("segment00003.ts"));
        assert_eq!(record.start, Duration::from_secs(12));
        assert_eq!(record.end, Duration::from_millis(16_016));
    }

    #[test]
    fn file_name_may_contain_commas() {
        let record = parse_segment_record("a,b.ts,0,4").unwrap().unwrap();
        assert_eq!(record.file, PathBuf::from("a,b.ts"));
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert_eq!(parse_segment_record("").unwrap(), None);
        assert_eq!(parse_segment_record("   ").unwrap(), None);
        assert_eq!(parse_segment_record("# produced by segmenter").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_records() {
        for line in [
            "segment.ts",
            "segment.ts,1.0",
            ",0,4",
            "segment.ts,zero,4",
            "segment.ts,-1,4",
            "segment.ts,8,4",
            "segment.ts,0,inf",
        ] {
            assert!(
                matches!(
                    parse_segment_record(line),
                    Err(SinkError::InvalidSegmentRecord(_))
                ),
                "{line} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn drives_controller_to_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            std::fs::write(dir.path().join(format!("segment{:05}.ts", i)), b"ts").unwrap();
        }

        let settings = SinkSettings {
            playlist_location: dir.path().join("playlist.m3u8"),
            target_duration: Duration::from_secs(4),
            ..Default::default()
        };
        let controller = Arc::new(SegmentController::new(settings, IgnoreRequests).unwrap());

        let input = "segment00000.ts,0.0,4.0\n\
                     garbage\n\
                     \n\
                     segment00001.ts,4.0,8.0\n\
                     segment00002.ts,8.0,10.5\n";
        let summary = run(input.as_bytes(), controller.clone(), dir.path())
            .await
            .unwrap();

        assert_eq!(summary, IngestSummary { segments: 3, skipped: 1 });

        let manifest = std::fs::read_to_string(dir.path().join("playlist.m3u8")).unwrap();
        assert!(manifest.contains("#EXTINF:2.500000,\nsegment00002.ts\n"));
        assert!(manifest.ends_with("#EXT-X-ENDLIST\n"));
        assert!(controller.status().end_of_stream);
    }
}
