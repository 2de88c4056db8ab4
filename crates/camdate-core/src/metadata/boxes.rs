//! ISO base media file format box framing.

use std::io::{Read, Seek};

use crate::cursor::{ByteCursor, ByteOrder};

/// A box's kind and byte range. `payload` is where the content starts,
/// after the 8- or 16-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxInfo {
    pub kind: [u8; 4],
    pub start: u64,
    pub payload: u64,
    pub end: u64,
}

impl BoxInfo {
    pub fn payload_len(&self) -> u64 {
        self.end - self.payload
    }
}

/// Reads the box header at `pos`. Returns `None` when the header or the
/// declared size does not fit inside `[pos, end)`. A size of 0 means the
/// box runs to `end`.
pub fn read_box<R: Read + Seek>(cur: &mut ByteCursor<R>, pos: u64, end: u64) -> Option<BoxInfo> {
    if pos.checked_add(8)? > end {
        return None;
    }
    let size = u64::from(cur.u32_at(pos, ByteOrder::Big).ok()?);
    let kind = cur.array_at::<4>(pos + 4).ok()?;
    let (size, header) = match size {
        0 => (end - pos, 8),
        1 => {
            if pos + 16 > end {
                return None;
            }
            (cur.u64_at(pos + 8, ByteOrder::Big).ok()?, 16)
        }
        n => (n, 8),
    };
    if size < header || size > end - pos {
        return None;
    }
    Some(BoxInfo {
        kind,
        start: pos,
        payload: pos + header,
        end: pos + size,
    })
}

/// Iterates the sibling boxes in `[start, end)`, stopping at the first one
/// that cannot be read. Every box is at least 8 bytes, so the walk always
/// advances.
pub struct Boxes<'a, R> {
    cur: &'a mut ByteCursor<R>,
    pos: u64,
    end: u64,
}

pub fn boxes<R: Read + Seek>(cur: &mut ByteCursor<R>, start: u64, end: u64) -> Boxes<'_, R> {
    Boxes { cur, pos: start, end }
}

impl<R: Read + Seek> Iterator for Boxes<'_, R> {
    type Item = BoxInfo;

    fn next(&mut self) -> Option<BoxInfo> {
        let found = read_box(self.cur, self.pos, self.end)?;
        self.pos = found.end;
        Some(found)
    }
}

/// First box of `kind` among the siblings in `[start, end)`.
pub fn find_box<R: Read + Seek>(
    cur: &mut ByteCursor<R>,
    kind: &[u8; 4],
    start: u64,
    end: u64,
) -> Option<BoxInfo> {
    boxes(cur, start, end).find(|b| &b.kind == kind)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    pub(crate) fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((8 + payload.len()) as u32).to_be_bytes().to_vec();
        out.extend(kind);
        out.extend(payload);
        out
    }

    fn cursor(bytes: Vec<u8>) -> ByteCursor<Cursor<Vec<u8>>> {
        ByteCursor::new(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn test_walks_siblings_and_finds_kind() {
        let mut data = mp4_box(b"ftyp", b"qt  \0\0\0\0");
        data.extend(mp4_box(b"free", &[]));
        data.extend(mp4_box(b"moov", &mp4_box(b"mvhd", &[0u8; 20])));
        let len = data.len() as u64;
        let mut cur = cursor(data);

        let kinds: Vec<_> = boxes(&mut cur, 0, len).map(|b| b.kind).collect();
        assert_eq!(kinds, [*b"ftyp", *b"free", *b"moov"]);

        let moov = find_box(&mut cur, b"moov", 0, len).unwrap();
        assert_eq!(moov.start, 24);
        let mvhd = find_box(&mut cur, b"mvhd", moov.payload, moov.end).unwrap();
        assert_eq!(mvhd.payload_len(), 20);
        assert!(find_box(&mut cur, b"udta", moov.payload, moov.end).is_none());
    }

    #[test]
    fn test_extended_and_open_ended_sizes() {
        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend(b"mdat");
        data.extend(20u64.to_be_bytes());
        data.extend([0u8; 4]);
        data.extend(0u32.to_be_bytes());
        data.extend(b"free");
        data.extend([0u8; 3]);
        let len = data.len() as u64;
        let mut cur = cursor(data);

        let mdat = read_box(&mut cur, 0, len).unwrap();
        assert_eq!((mdat.payload, mdat.end), (16, 20));
        let free = read_box(&mut cur, mdat.end, len).unwrap();
        assert_eq!(free.end, len);
    }

    #[test]
    fn test_oversized_or_undersized_box_is_rejected() {
        let mut data = 100u32.to_be_bytes().to_vec();
        data.extend(b"moov");
        let mut cur = cursor(data.clone());
        assert!(read_box(&mut cur, 0, 8).is_none());

        data[..4].copy_from_slice(&4u32.to_be_bytes());
        let mut cur = cursor(data);
        assert!(read_box(&mut cur, 0, 8).is_none());
        assert_eq!(boxes(&mut cur, 0, 8).count(), 0);
    }
}
