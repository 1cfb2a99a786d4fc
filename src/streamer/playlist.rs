//! VOD playlist synthesis and progressive (in-progress) playlist rendering.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

const FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'<').add(b'>').add(b'`').add(b'#').add(b'?').add(b'{').add(b'}').add(b'%').add(b'/');

/// Builds a finalized VOD playlist with `totalSegments` entries, the last
/// segment's `#EXTINF` carrying the remainder of `durationSec`.
pub fn synthesize_vod(duration_sec: f64, seg_sec: u64, total_segments: u32) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:3\n");
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", seg_sec));
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");

    for index in 0..total_segments {
        let remaining = duration_sec - (index as f64 * seg_sec as f64);
        let seg_duration = if index + 1 == total_segments { remaining.max(0.0) } else { seg_sec as f64 };
        out.push_str(&format!("#EXTINF:{:.3},\n", seg_duration));
        out.push_str(&format!("seg_{:05}.ts\n", index));
    }

    out.push_str("#EXT-X-ENDLIST\n");
    out
}

/// Progressive playlist for a source whose duration could not be probed yet:
/// lists segments already on disk plus a 3-segment look-ahead, without
/// `#EXT-X-ENDLIST` so the player keeps polling.
pub fn synthesize_progressive(existing_segments: &[u32], seg_sec: u64) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:3\n");
    out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", seg_sec));
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");

    let next_index = existing_segments.iter().max().map(|m| m + 1).unwrap_or(0);
    let look_ahead = next_index + 3;

    for index in 0..look_ahead {
        out.push_str(&format!("#EXTINF:{:.3},\n", seg_sec as f64));
        out.push_str(&format!("seg_{:05}.ts\n", index));
    }

    out
}

/// Rewrites a synthesized playlist's segment URIs to
/// `/api/stream/file?path=<relPath>&file=seg_NNNNN.ts`.
pub fn rewrite_for_stream(playlist: &str, source_rel_path: &str) -> String {
    let encoded_path = utf8_percent_encode(source_rel_path, FRAGMENT).to_string();
    playlist
        .lines()
        .map(|line| {
            if line.starts_with('#') || line.trim().is_empty() {
                line.to_string()
            } else {
                format!("/api/stream/file?path={}&file={}", encoded_path, line.trim())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vod_playlist_has_remainder_on_last_segment() {
        let body = synthesize_vod(13.0, 6, 3);
        assert!(body.contains("#EXTINF:6.000,\nseg_00000.ts"));
        assert!(body.contains("#EXTINF:1.000,\nseg_00002.ts"));
        assert!(body.trim_end().ends_with("#EXT-X-ENDLIST"));
    }

    #[test]
    fn progressive_playlist_has_no_endlist() {
        let body = synthesize_progressive(&[0, 1], 6);
        assert!(!body.contains("ENDLIST"));
        assert!(body.contains("seg_00004.ts"));
    }

    #[test]
    fn stream_rewrite_targets_stream_file_endpoint() {
        let body = synthesize_vod(6.0, 6, 1);
        let rewritten = rewrite_for_stream(&body, "movies/a b.mp4");
        assert!(rewritten.contains("/api/stream/file?path=movies%2Fa%20b.mp4&file=seg_00000.ts"));
    }
}
