//! Bounds-checked random access over a seekable byte source, plus the
//! fixed-width date codecs shared by the container parsers.

use std::io::{self, Read, Seek, SeekFrom};

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta};

/// Byte order of multi-byte integers inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Reader over a finite byte source. Every read is checked against the
/// source length before seeking, so a corrupt size field turns into an
/// `UnexpectedEof` error instead of a short or unbounded read.
pub struct ByteCursor<R> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> ByteCursor<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self { inner, len })
    }

    /// Total length of the underlying source in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, pos: u64, n: u64) -> io::Result<()> {
        match pos.checked_add(n) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {n} bytes at {pos} runs past end of data ({})", self.len),
            )),
        }
    }

    pub fn bytes_at(&mut self, pos: u64, n: usize) -> io::Result<Vec<u8>> {
        self.check(pos, n as u64)?;
        self.inner.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0u8; n];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn array_at<const N: usize>(&mut self, pos: u64) -> io::Result<[u8; N]> {
        self.check(pos, N as u64)?;
        self.inner.seek(SeekFrom::Start(pos))?;
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn u8_at(&mut self, pos: u64) -> io::Result<u8> {
        Ok(self.array_at::<1>(pos)?[0])
    }

    pub fn u16_at(&mut self, pos: u64, order: ByteOrder) -> io::Result<u16> {
        let b = self.array_at::<2>(pos)?;
        Ok(match order {
            ByteOrder::Big => u16::from_be_bytes(b),
            ByteOrder::Little => u16::from_le_bytes(b),
        })
    }

    pub fn u32_at(&mut self, pos: u64, order: ByteOrder) -> io::Result<u32> {
        let b = self.array_at::<4>(pos)?;
        Ok(match order {
            ByteOrder::Big => u32::from_be_bytes(b),
            ByteOrder::Little => u32::from_le_bytes(b),
        })
    }

    pub fn u64_at(&mut self, pos: u64, order: ByteOrder) -> io::Result<u64> {
        let b = self.array_at::<8>(pos)?;
        Ok(match order {
            ByteOrder::Big => u64::from_be_bytes(b),
            ByteOrder::Little => u64::from_le_bytes(b),
        })
    }

    /// Reads an unsigned integer whose width is only known at runtime, as in
    /// the `iloc` box. A width of 0 reads nothing and yields 0.
    pub fn uint_at(&mut self, pos: u64, width: u8, order: ByteOrder) -> io::Result<u64> {
        match width {
            0 => Ok(0),
            1 => self.u8_at(pos).map(u64::from),
            2 => self.u16_at(pos, order).map(u64::from),
            4 => self.u32_at(pos, order).map(u64::from),
            8 => self.u64_at(pos, order),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported integer width {width}"),
            )),
        }
    }

    /// Reads `n` bytes as a Latin-1 string (each byte maps to one char).
    pub fn latin1_at(&mut self, pos: u64, n: usize) -> io::Result<String> {
        Ok(self.bytes_at(pos, n)?.into_iter().map(char::from).collect())
    }
}

/// Length of an EXIF date without its trailing NUL.
pub const EXIF_DATE_LEN: usize = 19;

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// Decodes `yyyy:MM:dd HH:mm:ss`. Blank or partially-filled dates, which
/// some cameras write when their clock was never set, yield `None`.
pub fn decode_exif_date(raw: &[u8]) -> Option<NaiveDateTime> {
    let s = std::str::from_utf8(raw.get(..EXIF_DATE_LEN)?).ok()?;
    NaiveDateTime::parse_from_str(s, EXIF_DATE_FORMAT).ok()
}

/// Encodes a date in the fixed 19-byte EXIF form, or `None` when the year
/// cannot be written in four digits.
pub fn encode_exif_date(date: NaiveDateTime) -> Option<[u8; EXIF_DATE_LEN]> {
    if !(1..=9999).contains(&date.year()) {
        return None;
    }
    let s = date.format(EXIF_DATE_FORMAT).to_string();
    s.as_bytes().try_into().ok()
}

/// Seconds between 1904-01-01 and 1970-01-01.
pub const SECONDS_1904_TO_1970: u64 = 2_082_844_800;

/// Zero point of a container's raw seconds counter.
///
/// ISO base media files count from 1904, but some Android phones write
/// seconds since 1970. A raw value that would land before 1970 when read
/// against 1904 is taken to be a 1970-based count instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Epoch {
    Mac1904,
    Unix1970,
}

impl Epoch {
    pub fn origin(self) -> NaiveDateTime {
        let year = match self {
            Epoch::Mac1904 => 1904,
            Epoch::Unix1970 => 1970,
        };
        NaiveDate::from_ymd_opt(year, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default()
    }

    /// Decodes a raw seconds counter. Zero means "absent" and yields `None`.
    pub fn decode(secs: u64) -> Option<(NaiveDateTime, Epoch)> {
        if secs == 0 {
            return None;
        }
        let epoch = if secs < SECONDS_1904_TO_1970 {
            Epoch::Unix1970
        } else {
            Epoch::Mac1904
        };
        let delta = TimeDelta::try_seconds(i64::try_from(secs).ok()?)?;
        let date = epoch.origin().checked_add_signed(delta)?;
        Some((date, epoch))
    }

    /// Encodes a date as whole seconds since this epoch. Dates at or before
    /// the epoch cannot be represented (zero would read back as "absent").
    pub fn encode(self, date: NaiveDateTime) -> Option<u64> {
        let secs = (date - self.origin()).num_seconds();
        u64::try_from(secs).ok().filter(|s| *s > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_reads_both_byte_orders() {
        let mut cur = ByteCursor::new(Cursor::new(vec![0x12, 0x34, 0x56, 0x78])).unwrap();
        assert_eq!(cur.u16_at(0, ByteOrder::Big).unwrap(), 0x1234);
        assert_eq!(cur.u16_at(0, ByteOrder::Little).unwrap(), 0x3412);
        assert_eq!(cur.u32_at(0, ByteOrder::Big).unwrap(), 0x1234_5678);
        assert_eq!(cur.u32_at(0, ByteOrder::Little).unwrap(), 0x7856_3412);
        assert_eq!(cur.uint_at(1, 2, ByteOrder::Big).unwrap(), 0x3456);
        assert_eq!(cur.uint_at(1, 0, ByteOrder::Big).unwrap(), 0);
    }

    #[test]
    fn test_read_past_end_is_an_error() {
        let mut cur = ByteCursor::new(Cursor::new(vec![0u8; 6])).unwrap();
        assert_eq!(cur.len(), 6);
        assert!(cur.u32_at(4, ByteOrder::Big).is_err());
        assert!(cur.bytes_at(u64::MAX, 2).is_err());
        assert!(cur.uint_at(0, 3, ByteOrder::Big).is_err());
    }

    #[test]
    fn test_exif_date_round_trip_keeps_width() {
        let raw = b"2013:12:28 15:48:42\0";
        let date = decode_exif_date(raw).unwrap();
        assert_eq!(date, dt(2013, 12, 28, 15, 48, 42));

        let shifted = date + TimeDelta::days(1);
        let encoded = encode_exif_date(shifted).unwrap();
        assert_eq!(&encoded, b"2013:12:29 15:48:42");
        assert_eq!(decode_exif_date(&encoded), Some(shifted));
    }

    #[test]
    fn test_exif_date_rejects_blank_and_out_of_range() {
        assert_eq!(decode_exif_date(b"    :  :     :  :  \0"), None);
        assert_eq!(decode_exif_date(b"2013:12"), None);
        assert_eq!(encode_exif_date(dt(10000, 1, 1, 0, 0, 0)), None);
        assert_eq!(&encode_exif_date(dt(999, 1, 2, 3, 4, 5)).unwrap(), b"0999:01:02 03:04:05");
    }

    #[test]
    fn test_epoch_1904_is_default() {
        let (date, epoch) = Epoch::decode(3_565_800_000).unwrap();
        assert_eq!(epoch, Epoch::Mac1904);
        assert_eq!(date, dt(2016, 12, 28, 20, 0, 0));
        assert_eq!(epoch.encode(date), Some(3_565_800_000));
    }

    #[test]
    fn test_epoch_falls_back_to_1970_below_threshold() {
        let (date, epoch) = Epoch::decode(1_388_245_722).unwrap();
        assert_eq!(epoch, Epoch::Unix1970);
        assert_eq!(date, dt(2013, 12, 28, 15, 48, 42));
        assert_eq!(epoch.encode(date), Some(1_388_245_722));

        let (_, boundary) = Epoch::decode(SECONDS_1904_TO_1970).unwrap();
        assert_eq!(boundary, Epoch::Mac1904);
        assert!(Epoch::decode(0).is_none());
    }
}
