//! Tests for the record scanner

use super::*;

#[test]
fn test_ndjson_single_record() {
    let mut scanner = RecordScanner::new(Framing::NewlineDelimited);
    let records = scanner.feed(b"{\"message\":{\"content\":\"hi\"}}\n");
    assert_eq!(records, vec!["{\"message\":{\"content\":\"hi\"}}"]);
}

#[test]
fn test_ndjson_partial_line_across_chunks() {
    let mut scanner = RecordScanner::new(Framing::NewlineDelimited);
    assert!(scanner.feed(b"{\"content\":\"hel").is_empty());
    let records = scanner.feed(b"lo\"}\n{\"done\":true}\n");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], "{\"content\":\"hello\"}");
    assert_eq!(records[1], "{\"done\":true}");
}

#[test]
fn test_ndjson_blank_lines_skipped() {
    let mut scanner = RecordScanner::new(Framing::NewlineDelimited);
    let records = scanner.feed(b"\r\n{\"a\":1}\r\n\n{\"b\":2}\n");
    assert_eq!(records, vec!["{\"a\":1}", "{\"b\":2}"]);
}

#[test]
fn test_ndjson_finish_flushes_unterminated_tail() {
    let mut scanner = RecordScanner::new(Framing::NewlineDelimited);
    assert!(scanner.feed(b"{\"done\":true}").is_empty());
    assert_eq!(scanner.finish(), Some("{\"done\":true}".to_string()));
    assert!(!scanner.has_remaining());
}

#[test]
fn test_brace_extracts_objects_from_sse_lines() {
    let mut scanner = RecordScanner::new(Framing::BraceDelimited);
    let records = scanner.feed(b"data: {\"delta\":\"a\"}\n\ndata: {\"delta\":\"b\"}\n\n");
    assert_eq!(records, vec!["{\"delta\":\"a\"}", "{\"delta\":\"b\"}"]);
}

#[test]
fn test_brace_skips_done_sentinel() {
    let mut scanner = RecordScanner::new(Framing::BraceDelimited);
    let records = scanner.feed(b"data: {\"delta\":\"x\"}\n\ndata: [DONE]\n\n");
    assert_eq!(records, vec!["{\"delta\":\"x\"}"]);
    assert_eq!(scanner.finish(), None);
}

#[test]
fn test_brace_handles_json_array_framing() {
    let mut scanner = RecordScanner::new(Framing::BraceDelimited);
    // Streamed-array style: [ {...}, {...} ]
    let records = scanner.feed(b"[{\"text\":\"one\"},\n{\"text\":\"two\"}]");
    assert_eq!(records, vec!["{\"text\":\"one\"}", "{\"text\":\"two\"}"]);
}

#[test]
fn test_brace_ignores_braces_inside_strings() {
    let mut scanner = RecordScanner::new(Framing::BraceDelimited);
    let payload = b"{\"text\":\"code: if (x) { return {}; }\"}";
    let records = scanner.feed(payload);
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0],
        "{\"text\":\"code: if (x) { return {}; }\"}"
    );
}

#[test]
fn test_brace_split_inside_string_literal_with_braces() {
    // A record split mid-string, where the string itself contains { and }
    let whole = "{\"text\":\"fn main() { let b = {1}; }\"}";
    let mut scanner = RecordScanner::new(Framing::BraceDelimited);
    let mut records = Vec::new();
    records.extend(scanner.feed(b"{\"text\":\"fn main() { let b"));
    records.extend(scanner.feed(b" = {1}; }\"}"));
    assert_eq!(records, vec![whole.to_string()]);
}

#[test]
fn test_brace_escaped_quote_does_not_end_string() {
    let mut scanner = RecordScanner::new(Framing::BraceDelimited);
    let records = scanner.feed(b"{\"text\":\"she said \\\"hi {\\\" to me\"}");
    assert_eq!(records.len(), 1);
}

#[test]
fn test_nested_objects_are_one_record() {
    let mut scanner = RecordScanner::new(Framing::BraceDelimited);
    let records = scanner.feed(b"{\"a\":{\"b\":{\"c\":1}},\"d\":2} {\"e\":3}");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], "{\"a\":{\"b\":{\"c\":1}},\"d\":2}");
    assert_eq!(records[1], "{\"e\":3}");
}

#[test]
fn test_utf8_split_across_chunks() {
    // "é" is 0xC3 0xA9; split between the two bytes
    let mut scanner = RecordScanner::new(Framing::NewlineDelimited);
    assert!(scanner.feed(b"{\"t\":\"caf\xc3").is_empty());
    let records = scanner.feed(b"\xa9\"}\n");
    assert_eq!(records, vec!["{\"t\":\"caf\u{e9}\"}"]);
}

#[test]
fn test_utf8_split_four_byte_char_brace_mode() {
    // U+1F600 (😀) is F0 9F 98 80; feed one byte at a time
    let payload = "{\"t\":\"😀\"}".as_bytes().to_vec();
    let mut scanner = RecordScanner::new(Framing::BraceDelimited);
    let mut records = Vec::new();
    for byte in payload {
        records.extend(scanner.feed(&[byte]));
    }
    assert_eq!(records, vec!["{\"t\":\"😀\"}".to_string()]);
}

#[test]
fn test_arbitrary_chunking_equals_unchunked() {
    // The same byte stream must accumulate identically however it is chunked
    let body = "data: {\"text\":\"let x = {a: \\\"}{\\\"};\"}\n\ndata: {\"text\":\" more }{ text\"}\n\ndata: [DONE]\n\n";
    let bytes = body.as_bytes();

    let mut unchunked = RecordScanner::new(Framing::BraceDelimited);
    let mut expected = unchunked.feed(bytes);
    if let Some(tail) = unchunked.finish() {
        expected.push(tail);
    }

    for chunk_size in [1, 2, 3, 5, 7, 11, 64] {
        let mut scanner = RecordScanner::new(Framing::BraceDelimited);
        let mut records = Vec::new();
        for chunk in bytes.chunks(chunk_size) {
            records.extend(scanner.feed(chunk));
        }
        if let Some(tail) = scanner.finish() {
            records.push(tail);
        }
        assert_eq!(records, expected, "chunk size {chunk_size} diverged");
    }
}

#[test]
fn test_noise_between_objects_discarded() {
    let mut scanner = RecordScanner::new(Framing::BraceDelimited);
    let records = scanner.feed(b"event: delta\nid: 7\ndata: {\"x\":1}\n\n,\n");
    assert_eq!(records, vec!["{\"x\":1}"]);
    assert!(scanner.finish().is_none());
}
