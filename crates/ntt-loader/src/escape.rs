//! Field-local byte escaping for the `.raw` → staging-table transform
//! (§4.4 step 2, §9 "filename bytes").
//!
//! Filenames can contain every byte that is structurally significant to a
//! line-oriented bulk loader: the field delimiter (0x1C), the record
//! terminator, and the backslash escape character itself. Escaping must
//! apply **only within the path field** — escaping the whole stream would
//! also mangle the delimiters that give the stream its field structure in
//! the first place, which the source format's historical bug report called
//! out explicitly.

use std::io::{self, Read, Write};

pub const FIELD_SEP: u8 = 0x1C;
const RECORD_TERM: u8 = 0x00;

const N_FIELDS: usize = 7;

/// Escape the four bytes that are structurally significant to the
/// destination COPY stream: backslash, the field delimiter, and the two
/// line-ending bytes. Every other byte, printable or not, passes through
/// unchanged — Postgres's COPY text format only requires escaping bytes
/// that collide with its own framing.
pub fn escape_path_field(bytes: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(bytes.len());
	for &b in bytes {
		match b {
			b'\\' => out.extend_from_slice(b"\\\\"),
			FIELD_SEP => out.extend_from_slice(b"\\034"),
			b'\r' => out.extend_from_slice(b"\\015"),
			b'\n' => out.extend_from_slice(b"\\012"),
			other => out.push(other),
		}
	}
	out
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TransformStats {
	pub records_transformed: u64,
}

/// Transform a `.raw` byte stream into a Postgres COPY TEXT payload with
/// `DELIMITER '\x1c'`, suitable for `COPY staging FROM STDIN`. Fields 1-6
/// are copied through untouched (they are plain ASCII produced by the
/// enumerator); only field 7 (path) is escaped. The record terminator
/// (NUL) becomes `\n`, the line terminator COPY's text format expects.
pub fn transform_raw_to_copy_stream<R: Read, W: Write>(input: &mut R, output: &mut W) -> io::Result<TransformStats> {
	let mut stats = TransformStats::default();
	let mut field_index: usize = 1;
	let mut field_buf: Vec<u8> = Vec::new();
	let mut byte_buf = [0u8; 8192];

	loop {
		let n = input.read(&mut byte_buf)?;
		if n == 0 {
			break;
		}
		for &b in &byte_buf[..n] {
			if field_index < N_FIELDS && b == FIELD_SEP {
				output.write_all(&field_buf)?;
				output.write_all(&[FIELD_SEP])?;
				field_buf.clear();
				field_index += 1;
			} else if b == RECORD_TERM && field_index == N_FIELDS {
				output.write_all(&escape_path_field(&field_buf))?;
				output.write_all(b"\n")?;
				field_buf.clear();
				field_index = 1;
				stats.records_transformed += 1;
			} else {
				field_buf.push(b);
			}
		}
	}

	if !field_buf.is_empty() || field_index != 1 {
		return Err(io::Error::new(
			io::ErrorKind::UnexpectedEof,
			"raw stream ended mid-record",
		));
	}

	Ok(stats)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn escapes_only_the_four_structural_bytes() {
		let input = b"a\\b\x1cc\rd\ne".to_vec();
		let escaped = escape_path_field(&input);
		assert_eq!(escaped, b"a\\\\b\\034c\\015d\\012e");
	}

	#[test]
	fn leaves_high_bit_and_other_control_bytes_untouched() {
		let input = vec![0xffu8, 0x01, b'a', 0x7f];
		assert_eq!(escape_path_field(&input), input);
	}

	fn raw_record(fs_type: u8, dev: u64, ino: u64, nlink: u64, size: i64, mtime: i64, path: &[u8]) -> Vec<u8> {
		let mut buf = Vec::new();
		buf.push(fs_type);
        buf.push(FIELD_SEP);
		buf.extend_from_slice(dev.to_string().as_bytes());
		buf.push(FIELD_SEP);
		buf.extend_from_slice(ino.to_string().as_bytes());
		buf.push(FIELD_SEP);
		buf.extend_from_slice(nlink.to_string().as_bytes());
		buf.push(FIELD_SEP);
		buf.extend_from_slice(size.to_string().as_bytes());
		buf.push(FIELD_SEP);
		buf.extend_from_slice(mtime.to_string().as_bytes());
		buf.push(FIELD_SEP);
		buf.extend_from_slice(path);
		buf.push(RECORD_TERM);
		buf
	}

	#[test]
	fn transforms_plain_record_preserving_field_order() {
		let input = raw_record(b'f', 1, 42, 1, 6, 1_700_000_000, b"/mnt/x/a.txt");
		let mut out = Vec::new();
		let stats = transform_raw_to_copy_stream(&mut &input[..], &mut out).unwrap();
		assert_eq!(stats.records_transformed, 1);
		assert_eq!(out, b"f\x011\x0142\x011\x016\x011700000000\x01/mnt/x/a.txt\n");
	}

	#[test]
	fn path_containing_field_separator_byte_survives_escaped() {
		let mut path = b"weird".to_vec();
		path.push(FIELD_SEP);
		path.extend_from_slice(b"name");
		let input = raw_record(b'f', 1, 1, 1, 0, 0, &path);

		let mut out = Vec::new();
		transform_raw_to_copy_stream(&mut &input[..], &mut out).unwrap();

		// The embedded FS byte must appear escaped as \034, not as a live
		// delimiter, or a downstream COPY would see an 8th column.
		let text = String::from_utf8_lossy(&out);
		assert!(text.contains("weird\\034name"));
		assert_eq!(out.iter().filter(|&&b| b == FIELD_SEP).count(), 6);
	}

	#[test]
	fn path_containing_backslash_and_crlf_round_trips_escaped() {
		let input = raw_record(b'f', 1, 1, 1, 0, 0, b"a\\b\r\nc");
		let mut out = Vec::new();
		transform_raw_to_copy_stream(&mut &input[..], &mut out).unwrap();
		let text = String::from_utf8_lossy(&out);
		assert!(text.ends_with("a\\\\b\\015\\012c\n"));
	}

	#[test]
	fn multiple_records_each_terminate_on_own_line() {
		let mut input = raw_record(b'f', 1, 1, 1, 0, 0, b"one");
		input.extend(raw_record(b'f', 1, 2, 1, 0, 0, b"two"));
		let mut out = Vec::new();
		let stats = transform_raw_to_copy_stream(&mut &input[..], &mut out).unwrap();
		assert_eq!(stats.records_transformed, 2);
		assert_eq!(String::from_utf8_lossy(&out).lines().count(), 2);
	}

	#[test]
	fn truncated_stream_missing_terminator_is_an_error() {
		let mut input = raw_record(b'f', 1, 1, 1, 0, 0, b"one");
		input.pop(); // drop the trailing NUL
		let mut out = Vec::new();
		assert!(transform_raw_to_copy_stream(&mut &input[..], &mut out).is_err());
	}
}
