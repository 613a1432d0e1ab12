/*!
 * perfstats_digest: Line Source
 * -----------------------------
 * Copyright (C) 2025 Laurence Oberman <loberman@redhat.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 *
 * ----------------------------------------------------------------------
 *  Streaming line source shared by every per-file pipeline.
 *
 *  Sampler logs are read one line at a time; nothing upstream of the
 *  classifier ever holds the whole file. Bytes that are not valid UTF-8
 *  are replaced rather than aborting the file (some tools print locale
 *  dependent device or command names).
 */

use std::io::{self, BufRead};

/// One input line with its 1-based position in the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub number: usize,
    pub text: String,
}

/// Iterator over the lines of a reader, see [`raw_lines`].
pub struct RawLines<R> {
    reader: R,
    buf: Vec<u8>,
    number: usize,
}

/// Wrap a buffered reader into a `RawLine` stream.
/// Line terminators (`\n`, `\r\n`) are stripped.
pub fn raw_lines<R: BufRead>(reader: R) -> RawLines<R> {
    RawLines { reader, buf: Vec::with_capacity(256), number: 0 }
}

impl<R: BufRead> Iterator for RawLines<R> {
    type Item = io::Result<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                self.number += 1;
                Some(Ok(RawLine {
                    number: self.number,
                    text: String::from_utf8_lossy(&self.buf).into_owned(),
                }))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_and_terminators() {
        let input: &[u8] = b"first\r\nsecond\n\nlast";
        let lines: Vec<RawLine> = raw_lines(input).collect::<io::Result<_>>().unwrap();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], RawLine { number: 1, text: "first".into() });
        assert_eq!(lines[1].text, "second");
        assert_eq!(lines[2].text, "");
        assert_eq!(lines[3], RawLine { number: 4, text: "last".into() });
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let input: &[u8] = b"sda \xff\xfe 12\n";
        let line = raw_lines(input).next().unwrap().unwrap();
        assert!(line.text.starts_with("sda "));
        assert!(line.text.ends_with(" 12"));
    }
}
