//! Capture timestamps from the EXIF block of a JPEG.
//!
//! The timestamp sits three structures deep:
//!
//! ```text
//! JPEG APP1 segment ("Exif\0\0")
//!   TIFF header (byte order, magic, IFD0 offset)
//!     IFD0 -> 0x8769 Exif sub-IFD
//!               -> 0x9003 DateTimeOriginal
//!               -> 0x927C MakerNote IFD -> 0xFDE8 seconds + microseconds
//! ```
//!
//! Offsets inside the TIFF structure are relative to the TIFF header.

use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::time_index::Zone;

const EXIF_HEADER: &[u8] = b"Exif\0\0";
const TIFF_MAGIC: u16 = 0x002A;

const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;
const TAG_MAKER_NOTE: u16 = 0x927C;
const TAG_MAKER_TIMESTAMP: u16 = 0xFDE8;

const IFD_ENTRY_LEN: usize = 12;
const EXIF_DATE_LEN: usize = 19;

/// Reads capture timestamps, interpreting EXIF wall-clock dates in a zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampReader {
    zone: Zone,
}

impl TimestampReader {
    pub fn new(zone: Zone) -> Self {
        TimestampReader { zone }
    }

    /// Returns the capture time in microseconds, or `None` if the buffer
    /// holds no usable timestamp. Malformed metadata is never an error.
    pub fn read(&self, jpeg: &[u8]) -> Option<i64> {
        let segment = find_exif_segment(jpeg)?;
        let tiff = Tiff::parse(segment.strip_prefix(EXIF_HEADER)?)?;
        let exif_ifd = tiff.find_tag(tiff.ifd0_offset()?, TAG_EXIF_IFD)?;

        self.date_time_original(&tiff, exif_ifd)
            .or_else(|| maker_note_timestamp(&tiff, exif_ifd))
    }

    /// Loads `path` and reads its timestamp. Only failing to read the file
    /// is an error.
    pub fn read_file(&self, path: &Path) -> Result<Option<i64>> {
        let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
        Ok(self.read(&bytes))
    }

    fn date_time_original(&self, tiff: &Tiff<'_>, exif_ifd: usize) -> Option<i64> {
        let offset = tiff.find_tag(exif_ifd, TAG_DATE_TIME_ORIGINAL)?;
        let raw = tiff.data.get(offset..offset + EXIF_DATE_LEN)?;
        let text = std::str::from_utf8(raw).ok()?;
        let datetime = NaiveDateTime::parse_from_str(text, "%Y:%m:%d %H:%M:%S").ok()?;
        self.zone.to_micros(&datetime)
    }
}

/// Timestamp of a JPEG buffer with dates read as UTC.
pub fn extract_timestamp(jpeg: &[u8]) -> Option<i64> {
    TimestampReader::default().read(jpeg)
}

/// Timestamp of the file at `path` with dates read as UTC.
pub fn read_file_timestamp(path: &Path) -> Result<Option<i64>> {
    TimestampReader::default().read_file(path)
}

fn maker_note_timestamp(tiff: &Tiff<'_>, exif_ifd: usize) -> Option<i64> {
    let maker_note = tiff.find_tag(exif_ifd, TAG_MAKER_NOTE)?;
    let offset = tiff.find_tag(maker_note, TAG_MAKER_TIMESTAMP)?;
    let seconds = tiff.u32_at(offset)? as i32;
    let micros = tiff.u32_at(offset + 4)? as i32;
    Some(i64::from(seconds) * 1_000_000 + i64::from(micros))
}

/// Walks JPEG markers and returns the body of the first APP1 segment.
///
/// Markers are one or more `0xFF` bytes followed by a type byte. Start and
/// end of image, and stuffed `0x00`, carry no length; every other segment
/// starts with a big-endian length that counts itself.
fn find_exif_segment(buf: &[u8]) -> Option<&[u8]> {
    let mut pos = 0;

    while buf.len() - pos >= 4 {
        let byte = buf[pos];
        pos += 1;
        if byte != 0xFF {
            continue;
        }

        let marker = loop {
            if buf.len() - pos < 3 {
                return None;
            }
            let b = buf[pos];
            pos += 1;
            if b != 0xFF {
                break b;
            }
        };
        if matches!(marker, 0x00 | 0xD8 | 0xD9) {
            continue;
        }

        let length = usize::from(u16::from_be_bytes([buf[pos], buf[pos + 1]]));
        pos += 2;
        let body = buf.get(pos..pos + length.checked_sub(2)?)?;
        if marker == 0xE1 {
            return Some(body);
        }
        pos += body.len();
    }

    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

/// A TIFF structure with its byte order established.
struct Tiff<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> Tiff<'a> {
    fn parse(data: &'a [u8]) -> Option<Self> {
        let order = match data.get(..2)? {
            b"II" => ByteOrder::Little,
            b"MM" => ByteOrder::Big,
            _ => return None,
        };
        let tiff = Tiff { data, order };
        if tiff.u16_at(2)? != TIFF_MAGIC {
            return None;
        }
        Some(tiff)
    }

    fn ifd0_offset(&self) -> Option<usize> {
        self.u32_at(4).map(|v| v as usize)
    }

    fn u16_at(&self, offset: usize) -> Option<u16> {
        let bytes: [u8; 2] = self.data.get(offset..offset.checked_add(2)?)?.try_into().ok()?;
        Some(match self.order {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        let bytes: [u8; 4] = self.data.get(offset..offset.checked_add(4)?)?.try_into().ok()?;
        Some(match self.order {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    /// Scans the IFD at `ifd` for `tag` and returns the entry's 4-byte value
    /// field as an offset.
    fn find_tag(&self, ifd: usize, tag: u16) -> Option<usize> {
        let count = usize::from(self.u16_at(ifd)?);
        let entries = ifd.checked_add(2)?;
        if entries + count * IFD_ENTRY_LEN > self.data.len() {
            return None;
        }

        (0..count)
            .map(|i| entries + i * IFD_ENTRY_LEN)
            .find(|&entry| self.u16_at(entry) == Some(tag))
            .and_then(|entry| self.u32_at(entry + 8))
            .map(|value| value as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a TIFF block from IFDs laid out back to back, followed by a
    /// data area. Each entry's value is written verbatim.
    struct TiffBuilder {
        order: ByteOrder,
        bytes: Vec<u8>,
    }

    impl TiffBuilder {
        fn new(order: ByteOrder) -> Self {
            let mut b = TiffBuilder {
                order,
                bytes: Vec::new(),
            };
            b.bytes.extend_from_slice(match order {
                ByteOrder::Little => b"II",
                ByteOrder::Big => b"MM",
            });
            b.u16(TIFF_MAGIC);
            b.u32(8);
            b
        }

        fn u16(&mut self, v: u16) {
            let bytes = match self.order {
                ByteOrder::Little => v.to_le_bytes(),
                ByteOrder::Big => v.to_be_bytes(),
            };
            self.bytes.extend_from_slice(&bytes);
        }

        fn u32(&mut self, v: u32) {
            let bytes = match self.order {
                ByteOrder::Little => v.to_le_bytes(),
                ByteOrder::Big => v.to_be_bytes(),
            };
            self.bytes.extend_from_slice(&bytes);
        }

        /// Appends an IFD and returns the offset just past it.
        fn ifd(&mut self, entries: &[(u16, u32)]) -> u32 {
            self.u16(entries.len() as u16);
            for &(tag, value) in entries {
                self.u16(tag);
                self.u16(4);
                self.u32(1);
                self.u32(value);
            }
            self.u32(0);
            self.bytes.len() as u32
        }

        fn raw(&mut self, data: &[u8]) {
            self.bytes.extend_from_slice(data);
        }
    }

    fn ifd_len(entries: u32) -> u32 {
        2 + 12 * entries + 4
    }

    fn jpeg_with_app1(tiff: &[u8]) -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8];
        // An APP0 segment to skip first.
        jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x4A, 0x46]);
        let length = (EXIF_HEADER.len() + tiff.len() + 2) as u16;
        jpeg.extend_from_slice(&[0xFF, 0xFF, 0xE1]);
        jpeg.extend_from_slice(&length.to_be_bytes());
        jpeg.extend_from_slice(EXIF_HEADER);
        jpeg.extend_from_slice(tiff);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }

    fn date_tiff(order: ByteOrder, date: &[u8]) -> Vec<u8> {
        let mut b = TiffBuilder::new(order);
        let sub_ifd = 8 + ifd_len(1);
        let date_offset = sub_ifd + ifd_len(1);
        b.ifd(&[(TAG_EXIF_IFD, sub_ifd)]);
        b.ifd(&[(TAG_DATE_TIME_ORIGINAL, date_offset)]);
        b.raw(date);
        b.bytes
    }

    fn expected_2020_01_02() -> i64 {
        chrono::NaiveDate::from_ymd_opt(2020, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .unwrap()
            .and_utc()
            .timestamp_micros()
    }

    #[test]
    fn reads_date_time_original_little_endian() {
        let jpeg = jpeg_with_app1(&date_tiff(ByteOrder::Little, b"2020:01:02 03:04:05\0"));
        assert_eq!(extract_timestamp(&jpeg), Some(expected_2020_01_02()));
    }

    #[test]
    fn reads_date_time_original_big_endian() {
        let jpeg = jpeg_with_app1(&date_tiff(ByteOrder::Big, b"2020:01:02 03:04:05\0"));
        let micros = extract_timestamp(&jpeg).unwrap();
        assert_eq!(micros, expected_2020_01_02());
        assert_eq!(micros % 1_000_000, 0);
    }

    #[test]
    fn missing_app1_is_not_found() {
        assert_eq!(extract_timestamp(&[0xFF, 0xD8, 0xFF, 0xD9]), None);
        assert_eq!(extract_timestamp(&[]), None);
    }

    #[test]
    fn rejects_bad_header_order_and_magic() {
        let mut tiff = date_tiff(ByteOrder::Little, b"2020:01:02 03:04:05\0");
        tiff[0] = b'X';
        assert_eq!(extract_timestamp(&jpeg_with_app1(&tiff)), None);

        let mut tiff = date_tiff(ByteOrder::Little, b"2020:01:02 03:04:05\0");
        tiff[2] = 0x2B;
        assert_eq!(extract_timestamp(&jpeg_with_app1(&tiff)), None);

        let mut jpeg = jpeg_with_app1(&date_tiff(ByteOrder::Little, b"2020:01:02 03:04:05\0"));
        let header = jpeg.windows(4).position(|w| w == b"Exif").unwrap();
        jpeg[header] = b'e';
        assert_eq!(extract_timestamp(&jpeg), None);
    }

    #[test]
    fn truncated_segment_is_not_found() {
        let jpeg = jpeg_with_app1(&date_tiff(ByteOrder::Little, b"2020:01:02 03:04:05\0"));
        assert_eq!(extract_timestamp(&jpeg[..jpeg.len() / 2]), None);
    }

    fn maker_note_tiff(order: ByteOrder, date: Option<&[u8]>) -> Vec<u8> {
        let mut b = TiffBuilder::new(order);
        let sub_entries = if date.is_some() { 2 } else { 1 };
        let sub_ifd = 8 + ifd_len(1);
        let maker_ifd = sub_ifd + ifd_len(sub_entries);
        let stamp = maker_ifd + ifd_len(1);
        let date_offset = stamp + 8;

        b.ifd(&[(TAG_EXIF_IFD, sub_ifd)]);
        match date {
            Some(_) => b.ifd(&[
                (TAG_DATE_TIME_ORIGINAL, date_offset),
                (TAG_MAKER_NOTE, maker_ifd),
            ]),
            None => b.ifd(&[(TAG_MAKER_NOTE, maker_ifd)]),
        };
        b.ifd(&[(TAG_MAKER_TIMESTAMP, stamp)]);
        b.u32(1_600_000_000);
        b.u32(250_000);
        if let Some(date) = date {
            b.raw(date);
        }
        b.bytes
    }

    #[test]
    fn falls_back_to_maker_note() {
        let jpeg = jpeg_with_app1(&maker_note_tiff(ByteOrder::Big, None));
        assert_eq!(extract_timestamp(&jpeg), Some(1_600_000_000_250_000));
    }

    #[test]
    fn unparseable_date_falls_through() {
        let tiff = maker_note_tiff(ByteOrder::Little, Some(b"not a date at all!!\0"));
        assert_eq!(
            extract_timestamp(&jpeg_with_app1(&tiff)),
            Some(1_600_000_000_250_000)
        );
    }

    #[test]
    fn out_of_bounds_offsets_are_not_found() {
        let mut b = TiffBuilder::new(ByteOrder::Little);
        b.ifd(&[(TAG_EXIF_IFD, 10_000)]);
        assert_eq!(extract_timestamp(&jpeg_with_app1(&b.bytes)), None);
    }

    #[test]
    fn read_file_reports_io_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let reader = TimestampReader::default();
        assert!(matches!(
            reader.read_file(&tmp.path().join("missing.jpg")),
            Err(Error::Io { .. })
        ));

        let path = tmp.path().join("plain.jpg");
        fs::write(&path, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        assert_eq!(reader.read_file(&path).unwrap(), None);
    }
}
