#![cfg(test)]

use crate::stream::StreamWriter;

#[test]
fn flush_through_writes_every_piece_immediately() {
    let mut sink = Vec::new();
    let mut writer = StreamWriter::new(&mut sink, 0);
    writer.write_piece(b"he").unwrap();
    writer.write_piece(b"llo").unwrap();
    drop(writer);
    assert_eq!(sink, b"hello");
}

#[test]
fn coalescing_holds_bytes_until_threshold() {
    let mut sink = Vec::new();
    let mut writer = StreamWriter::new(&mut sink, 8);
    writer.write_piece(b"abc").unwrap();
    writer.write_piece(b"de").unwrap();
    // 5 bytes pending, below the threshold: nothing written yet.
    writer.write_piece(b"fgh").unwrap();
    // 8 bytes reached: one drain.
    writer.write_piece(b"i").unwrap();
    drop(writer);
    assert_eq!(sink, b"abcdefgh");
}

#[test]
fn explicit_flush_drains_the_remainder() {
    let mut sink = Vec::new();
    let mut writer = StreamWriter::new(&mut sink, 64);
    writer.write_piece(b"tail").unwrap();
    writer.flush().unwrap();
    drop(writer);
    assert_eq!(sink, b"tail");
}

#[test]
fn pieces_stay_in_order_across_drains() {
    let mut sink = Vec::new();
    let mut writer = StreamWriter::new(&mut sink, 2);
    for piece in [&b"a"[..], b"bb", b"c", b"ddd", b"e"] {
        writer.write_piece(piece).unwrap();
    }
    writer.flush().unwrap();
    drop(writer);
    assert_eq!(sink, b"abbcddde");
}
