//! WebVTT subtitle formatting (§6). The transcription provider itself is
//! an external collaborator (§1 non-goals) — this module only owns the
//! segment-list-to-WebVTT contract.

use serde::{Deserialize, Serialize};

/// One transcribed span, as returned by whichever transcription provider
/// adapter the caller wires in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

fn format_timestamp(total_seconds: f64) -> String {
    let total_millis = (total_seconds * 1000.0).round().max(0.0) as i64;
    let millis = total_millis % 1000;
    let total_seconds_i = total_millis / 1000;
    let seconds = total_seconds_i % 60;
    let total_minutes = total_seconds_i / 60;
    let minutes = total_minutes % 60;
    let hours = total_minutes / 60;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

/// Renders one recording's segments as a standalone WebVTT file (§6):
/// `WEBVTT\n\n` header, then one cue per segment with a 1-based ordinal.
pub fn render_vtt(segments: &[TranscriptSegment]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for (i, segment) in segments.iter().enumerate() {
        out.push_str(&format!("{}\n", i + 1));
        out.push_str(&format!(
            "{} --> {}\n",
            format_timestamp(segment.start_sec),
            format_timestamp(segment.end_sec)
        ));
        out.push_str(&segment.text);
        out.push_str("\n\n");
    }
    out
}

/// One speaker's labeled segment, for merging multiple per-guest VTTs into
/// a single room-level subtitle track.
#[derive(Debug, Clone)]
pub struct SpeakerSegment {
    pub speaker_name: String,
    pub segment: TranscriptSegment,
}

/// Merges per-guest transcripts into one VTT, wrapping each cue's text in
/// `<v SpeakerName>` and sorting primarily by start time, secondarily by
/// end time (§6).
pub fn render_merged_vtt(mut segments: Vec<SpeakerSegment>) -> String {
    segments.sort_by(|a, b| {
        a.segment
            .start_sec
            .partial_cmp(&b.segment.start_sec)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.segment
                    .end_sec
                    .partial_cmp(&b.segment.end_sec)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let mut out = String::from("WEBVTT\n\n");
    for (i, entry) in segments.iter().enumerate() {
        out.push_str(&format!("{}\n", i + 1));
        out.push_str(&format!(
            "{} --> {}\n",
            format_timestamp(entry.segment.start_sec),
            format_timestamp(entry.segment.end_sec)
        ));
        out.push_str(&format!("<v {}>{}\n\n", entry.speaker_name, entry.segment.text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_timestamp_with_hours_minutes_seconds_millis() {
        assert_eq!(format_timestamp(0.0), "00:00:00.000");
        assert_eq!(format_timestamp(1.5), "00:00:01.500");
        assert_eq!(format_timestamp(3661.25), "01:01:01.250");
    }

    #[test]
    fn renders_single_cue_with_header_and_ordinal() {
        let vtt = render_vtt(&[TranscriptSegment {
            start_sec: 0.0,
            end_sec: 2.0,
            text: "Hello there".to_string(),
        }]);
        assert_eq!(
            vtt,
            "WEBVTT\n\n1\n00:00:00.000 --> 00:00:02.000\nHello there\n\n"
        );
    }

    #[test]
    fn renders_multiple_cues_with_incrementing_ordinals() {
        let vtt = render_vtt(&[
            TranscriptSegment {
                start_sec: 0.0,
                end_sec: 1.0,
                text: "One".to_string(),
            },
            TranscriptSegment {
                start_sec: 1.0,
                end_sec: 2.0,
                text: "Two".to_string(),
            },
        ]);
        assert!(vtt.contains("1\n00:00:00.000 --> 00:00:01.000\nOne\n\n"));
        assert!(vtt.contains("2\n00:00:01.000 --> 00:00:02.000\nTwo\n\n"));
    }

    #[test]
    fn merges_and_sorts_by_start_then_end_time_with_speaker_tags() {
        let segments = vec![
            SpeakerSegment {
                speaker_name: "Bob".to_string(),
                segment: TranscriptSegment {
                    start_sec: 5.0,
                    end_sec: 6.0,
                    text: "Second".to_string(),
                },
            },
            SpeakerSegment {
                speaker_name: "Alice".to_string(),
                segment: TranscriptSegment {
                    start_sec: 0.0,
                    end_sec: 4.0,
                    text: "First".to_string(),
                },
            },
        ];
        let vtt = render_merged_vtt(segments);
        let first_idx = vtt.find("First").unwrap();
        let second_idx = vtt.find("Second").unwrap();
        assert!(first_idx < second_idx);
        assert!(vtt.contains("<v Alice>First"));
        assert!(vtt.contains("<v Bob>Second"));
    }
}
