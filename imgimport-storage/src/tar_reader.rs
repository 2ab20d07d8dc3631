// Copyright 2024 The imgimport Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::pin::Pin;
use core::task::{Context, Poll, ready};
use std::io;

use imgimport_error::{Code, Error, ResultExt, error_if, make_input_err};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf, Take};

const BLOCK_SIZE: usize = 512;
/// Largest GNU long name or PAX header we are willing to hold in memory.
const MAX_META_SIZE: u64 = 1024 * 1024;

const NAME_RANGE: core::ops::Range<usize> = 0..100;
const SIZE_RANGE: core::ops::Range<usize> = 124..136;
const CHECKSUM_RANGE: core::ops::Range<usize> = 148..156;
const TYPEFLAG_OFFSET: usize = 156;
const MAGIC_RANGE: core::ops::Range<usize> = 257..263;
const PREFIX_RANGE: core::ops::Range<usize> = 345..500;
const USTAR_MAGIC: &[u8] = b"ustar\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular,
    Directory,
    HardLink,
    Symlink,
    /// Character and block devices, FIFOs and vendor extensions.
    Other(u8),
}

impl EntryType {
    const fn from_typeflag(typeflag: u8) -> Self {
        match typeflag {
            b'0' | b'\0' | b'7' => Self::Regular,
            b'1' => Self::HardLink,
            b'2' => Self::Symlink,
            b'5' => Self::Directory,
            other => Self::Other(other),
        }
    }

    /// Entries of these types never carry data, whatever their size field
    /// says.
    const fn is_header_only(self) -> bool {
        matches!(
            self,
            Self::Directory | Self::HardLink | Self::Symlink | Self::Other(b'3' | b'4' | b'6')
        )
    }
}

/// Header of one archive member. `path` is relative and normalised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarEntry {
    pub path: String,
    pub size: u64,
    pub entry_type: EntryType,
}

#[derive(Debug, Default)]
struct PaxOverrides {
    path: Option<String>,
    size: Option<u64>,
}

/// Streaming TAR reader. `next_entry` advances to the next member and the
/// reader itself yields the body of the current member.
#[derive(Debug)]
pub struct TarReader<R> {
    // The limit is the unread part of the current entry body.
    inner: Take<R>,
    padding: usize,
    finished: bool,
}

impl<R: AsyncRead + Unpin> TarReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: inner.take(0),
            padding: 0,
            finished: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }

    /// Advance to the next member, skipping whatever is left of the
    /// current one. `None` at the end of the archive.
    pub async fn next_entry(&mut self) -> Result<Option<TarEntry>, Error> {
        if self.finished {
            return Ok(None);
        }
        self.skip_rest_of_entry().await?;

        let mut long_name: Option<String> = None;
        let mut pax = PaxOverrides::default();
        loop {
            let Some(block) = self.read_block().await? else {
                self.finished = true;
                return Ok(None);
            };
            if is_zero_block(&block) {
                // The end marker is two zero blocks, some writers omit the
                // second one.
                if let Some(next) = self.read_block().await? {
                    error_if!(
                        !is_zero_block(&next),
                        "Invalid tar archive: data follows the end-of-archive marker"
                    );
                }
                self.finished = true;
                return Ok(None);
            }

            verify_checksum(&block)?;
            let header_size = parse_numeric(&block[SIZE_RANGE], "size")?;
            let typeflag = block[TYPEFLAG_OFFSET];
            match typeflag {
                b'L' => {
                    let name = self.read_meta(header_size).await?;
                    long_name = Some(c_string(&name));
                    continue;
                }
                b'x' => {
                    pax = parse_pax(&self.read_meta(header_size).await?)?;
                    continue;
                }
                // Global PAX headers and GNU long link names don't affect
                // what gets extracted.
                b'g' | b'K' => {
                    self.read_meta(header_size).await?;
                    continue;
                }
                _ => {}
            }

            let raw_name = pax
                .path
                .take()
                .or_else(|| long_name.take())
                .unwrap_or_else(|| header_name(&block));
            let mut entry_type = EntryType::from_typeflag(typeflag);
            if entry_type == EntryType::Regular && raw_name.ends_with('/') {
                entry_type = EntryType::Directory;
            }
            let size = if entry_type.is_header_only() {
                0
            } else {
                pax.size.unwrap_or(header_size)
            };
            let path = normalize_entry_name(&raw_name)?;

            self.inner.set_limit(size);
            self.padding = padding_for(size);
            return Ok(Some(TarEntry {
                path,
                size,
                entry_type,
            }));
        }
    }

    /// One header block, `None` on a clean end of stream.
    async fn read_block(&mut self) -> Result<Option<[u8; BLOCK_SIZE]>, Error> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let read = self
                .inner
                .get_mut()
                .read(&mut block[filled..])
                .await
                .err_tip(|| "While reading tar header")?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        match filled {
            0 => Ok(None),
            BLOCK_SIZE => Ok(Some(block)),
            _ => Err(make_input_err!(
                "Invalid tar archive: truncated header ({filled} of {BLOCK_SIZE} bytes)"
            )),
        }
    }

    /// Body of a metadata entry plus its padding.
    async fn read_meta(&mut self, size: u64) -> Result<Vec<u8>, Error> {
        error_if!(
            size > MAX_META_SIZE,
            "Invalid tar archive: {size} byte extended header is too large"
        );
        let mut data = vec![0u8; size as usize];
        self.read_exact_raw(&mut data).await?;
        let mut padding = [0u8; BLOCK_SIZE];
        self.read_exact_raw(&mut padding[..padding_for(size)])
            .await?;
        Ok(data)
    }

    async fn read_exact_raw(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        match self.inner.get_mut().read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Err(make_input_err!(
                "Invalid tar archive: truncated entry body"
            )),
            Err(err) => Err(Error::from(err).append("While reading tar archive")),
        }
    }

    async fn skip_rest_of_entry(&mut self) -> Result<(), Error> {
        let remaining = self.inner.limit();
        if remaining > 0 {
            tokio::io::copy(&mut self.inner, &mut tokio::io::sink())
                .await
                .err_tip(|| "While skipping tar entry")?;
            error_if!(
                self.inner.limit() > 0,
                "Invalid tar archive: truncated entry body"
            );
        }
        let padding = core::mem::take(&mut self.padding);
        let mut buf = [0u8; BLOCK_SIZE];
        self.read_exact_raw(&mut buf[..padding]).await
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TarReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.inner.limit() == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if buf.filled().len() == before {
            return Poll::Ready(Err(make_input_err!(
                "Invalid tar archive: truncated entry body"
            )
            .to_std_err()));
        }
        Poll::Ready(Ok(()))
    }
}

const fn padding_for(size: u64) -> usize {
    ((BLOCK_SIZE as u64 - size % BLOCK_SIZE as u64) % BLOCK_SIZE as u64) as usize
}

fn is_zero_block(block: &[u8; BLOCK_SIZE]) -> bool {
    block.iter().all(|byte| *byte == 0)
}

/// Bytes up to the first NUL, lossily decoded.
fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|byte| *byte == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn header_name(block: &[u8; BLOCK_SIZE]) -> String {
    let name = c_string(&block[NAME_RANGE]);
    if &block[MAGIC_RANGE] != USTAR_MAGIC {
        return name;
    }
    let prefix = c_string(&block[PREFIX_RANGE]);
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}

/// Octal, or base-256 when the high bit of the first byte is set.
fn parse_numeric(field: &[u8], what: &str) -> Result<u64, Error> {
    if let Some((&first, rest)) = field.split_first() {
        if first & 0x80 != 0 {
            error_if!(
                first & 0x40 != 0,
                "Invalid tar archive: negative {what} field"
            );
            return rest
                .iter()
                .try_fold(u64::from(first & 0x7f), |acc, byte| {
                    acc.checked_mul(256)?.checked_add(u64::from(*byte))
                })
                .ok_or_else(|| make_input_err!("Invalid tar archive: {what} field overflows"));
        }
    }
    let text = core::str::from_utf8(field)
        .map_err(|_| make_input_err!("Invalid tar archive: bad {what} field"))?
        .trim_matches(|c: char| c == '\0' || c == ' ');
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(text, 8)
        .map_err(|_| make_input_err!("Invalid tar archive: bad {what} field {text:?}"))
}

fn verify_checksum(block: &[u8; BLOCK_SIZE]) -> Result<(), Error> {
    let expected = parse_numeric(&block[CHECKSUM_RANGE], "checksum")?;
    let (mut unsigned, mut signed) = (0u64, 0i64);
    for (offset, byte) in block.iter().enumerate() {
        let byte = if CHECKSUM_RANGE.contains(&offset) {
            b' '
        } else {
            *byte
        };
        unsigned += u64::from(byte);
        signed += i64::from(byte as i8);
    }
    // Some old writers summed signed bytes.
    if expected == unsigned || i64::try_from(expected).is_ok_and(|expected| expected == signed) {
        return Ok(());
    }
    Err(make_input_err!(
        "Invalid tar archive: header checksum mismatch (stored {expected}, computed {unsigned})"
    ))
}

/// PAX records have the form `"<length> <key>=<value>\n"`.
fn parse_pax(mut data: &[u8]) -> Result<PaxOverrides, Error> {
    let mut overrides = PaxOverrides::default();
    while !data.is_empty() {
        let space = data
            .iter()
            .position(|byte| *byte == b' ')
            .err_tip_with_code(|_| (Code::InvalidArgument, "Invalid tar archive: bad PAX record"))?;
        let length: usize = core::str::from_utf8(&data[..space])
            .ok()
            .and_then(|length| length.parse().ok())
            .filter(|length| *length > space + 1 && *length <= data.len())
            .err_tip_with_code(|_| {
                (Code::InvalidArgument, "Invalid tar archive: bad PAX record length")
            })?;
        let record = &data[space + 1..length];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        let (key, value) = record
            .iter()
            .position(|byte| *byte == b'=')
            .map(|eq| (&record[..eq], &record[eq + 1..]))
            .err_tip_with_code(|_| (Code::InvalidArgument, "Invalid tar archive: bad PAX record"))?;
        match key {
            b"path" => overrides.path = Some(String::from_utf8_lossy(value).into_owned()),
            b"size" => {
                let size = core::str::from_utf8(value)
                    .ok()
                    .and_then(|size| size.parse().ok())
                    .err_tip_with_code(|_| {
                        (Code::InvalidArgument, "Invalid tar archive: bad PAX size")
                    })?;
                overrides.size = Some(size);
            }
            _ => {}
        }
        data = &data[length..];
    }
    Ok(overrides)
}

/// Strip leading `/` and `./`, drop `.` components and reject `..`.
fn normalize_entry_name(name: &str) -> Result<String, Error> {
    let mut components = Vec::new();
    for component in name.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                return Err(make_input_err!(
                    "Invalid tar archive: entry {name:?} escapes the destination"
                ));
            }
            component => components.push(component),
        }
    }
    Ok(components.join("/"))
}
