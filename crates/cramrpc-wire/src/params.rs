//! Self-describing parameter buffer.
//!
//! A message is a fixed header prefix followed by a chain of records:
//!
//! ```text
//! ┌──────────┬──────────┬─────────────────┬─────────────┬─────────────┐
//! │ id (4B)  │ size(4B) │ next_offset(4B) │ data[size]  │ pad to 4B   │
//! └──────────┴──────────┴─────────────────┴─────────────┴─────────────┘
//! ```
//! All fields are big-endian. `next_offset` is measured from the start of
//! the parameter area; 0 marks the last record.
//!
//! A [`ParamBuffer`] owns two [`Region`]s: `output` (what this side sends)
//! and `input` (what it received). Reads are permissive: a missing id or a
//! record of the wrong size yields the type's zero value, never an error.
//! Untrusted input must pass [`Region::validate`] before anything else is
//! decided from it.

use std::ops::Range;

use bytes::BytesMut;

use crate::error::{Result, WireError};
use crate::header::{DEFAULT_MAX_PAYLOAD, HEADER_SIZE};

/// id + size + next_offset.
pub const RECORD_HEADER_SIZE: usize = 12;

/// Bytes a record with `size` data bytes occupies on the wire.
pub const fn record_len(size: usize) -> usize {
    RECORD_HEADER_SIZE + pad4(size)
}

const fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

/// A typed parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue<'a> {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Stored as UTF-8 plus one NUL byte.
    Str(&'a str),
    Bytes(&'a [u8]),
}

impl ParamValue<'_> {
    /// Record data size on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            ParamValue::I32(_) | ParamValue::U32(_) | ParamValue::F32(_) => 4,
            ParamValue::I64(_) | ParamValue::U64(_) | ParamValue::F64(_) => 8,
            ParamValue::Str(s) => s.len() + 1,
            ParamValue::Bytes(b) => b.len(),
        }
    }

    fn write_into(&self, dst: &mut [u8]) {
        match self {
            ParamValue::I32(v) => dst.copy_from_slice(&v.to_be_bytes()),
            ParamValue::U32(v) => dst.copy_from_slice(&v.to_be_bytes()),
            ParamValue::I64(v) => dst.copy_from_slice(&v.to_be_bytes()),
            ParamValue::U64(v) => dst.copy_from_slice(&v.to_be_bytes()),
            ParamValue::F32(v) => dst.copy_from_slice(&v.to_bits().to_be_bytes()),
            ParamValue::F64(v) => dst.copy_from_slice(&v.to_bits().to_be_bytes()),
            ParamValue::Str(s) => {
                dst[..s.len()].copy_from_slice(s.as_bytes());
                dst[s.len()] = 0;
            }
            ParamValue::Bytes(b) => dst.copy_from_slice(b),
        }
    }
}

/// One record seen while walking a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub id: u32,
    /// Offset of the record header inside the parameter area.
    pub offset: usize,
    pub data: &'a [u8],
}

impl Record<'_> {
    /// Range of the data bytes inside the parameter area.
    pub fn data_range(&self) -> Range<usize> {
        let start = self.offset + RECORD_HEADER_SIZE;
        start..start + self.data.len()
    }
}

/// Defensive walker over a record chain.
///
/// Yields `Err(MalformedParams)` once and stops if a record would overrun
/// the area or a link points backwards.
pub struct Records<'a> {
    params: &'a [u8],
    next: Option<usize>,
}

impl<'a> Records<'a> {
    pub fn new(params: &'a [u8]) -> Self {
        Self {
            params,
            next: if params.is_empty() { None } else { Some(0) },
        }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next.take()?;
        match parse_record(self.params, offset) {
            Ok((record, next)) => {
                self.next = next;
                Some(Ok(record))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

fn parse_record(params: &[u8], offset: usize) -> Result<(Record<'_>, Option<usize>)> {
    let header_end = offset
        .checked_add(RECORD_HEADER_SIZE)
        .filter(|end| *end <= params.len())
        .ok_or(WireError::MalformedParams)?;
    let field = |at: usize| {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&params[at..at + 4]);
        u32::from_be_bytes(raw)
    };
    let id = field(offset);
    let size = field(offset + 4) as usize;
    let next = field(offset + 8) as usize;

    let record_end = header_end
        .checked_add(pad4(size))
        .filter(|end| *end <= params.len())
        .ok_or(WireError::MalformedParams)?;
    let record = Record {
        id,
        offset,
        data: &params[header_end..header_end + size],
    };

    if next == 0 {
        return Ok((record, None));
    }
    if next < record_end || next % 4 != 0 {
        return Err(WireError::MalformedParams);
    }
    Ok((record, Some(next)))
}

/// Returns true if the record chain in `params` stays inside its length.
pub fn validate(params: &[u8]) -> bool {
    Records::new(params).all(|record| record.is_ok())
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    id: u32,
    offset: usize,
    size: usize,
}

/// One message buffer: a fixed header prefix plus a parameter area with a
/// logical length.
///
/// The allocation is made once and reused for every exchange.
#[derive(Debug, Clone)]
pub struct Region {
    buf: BytesMut,
    header_size: usize,
    len: usize,
    // Records registered through `set`, in chain order.
    slots: Vec<Slot>,
    indexed: bool,
}

impl Region {
    /// A region with `header_size` opaque header bytes and room for
    /// `capacity` bytes of records.
    pub fn new(header_size: usize, capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(header_size + capacity);
        buf.resize(header_size + capacity, 0);
        Self {
            buf,
            header_size,
            len: 0,
            slots: Vec::new(),
            indexed: true,
        }
    }

    /// Bytes available for records.
    pub fn capacity(&self) -> usize {
        self.buf.len() - self.header_size
    }

    /// Logical length of the parameter area.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Header plus logical length: what goes on the wire.
    pub fn message_len(&self) -> usize {
        self.header_size + self.len
    }

    pub fn header(&self) -> &[u8] {
        &self.buf[..self.header_size]
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.header_size]
    }

    /// The parameter area.
    pub fn params(&self) -> &[u8] {
        &self.buf[self.header_size..self.header_size + self.len]
    }

    /// Header plus parameter area.
    pub fn message(&self) -> &[u8] {
        &self.buf[..self.message_len()]
    }

    /// Forget all records; the header bytes are left as they are.
    pub fn clear(&mut self) {
        self.len = 0;
        self.slots.clear();
        self.indexed = true;
    }

    /// Replace the content with a complete received message.
    pub fn load(&mut self, message: &[u8]) -> Result<()> {
        if message.len() < self.header_size {
            return Err(WireError::Truncated {
                len: message.len(),
                needed: self.header_size,
            });
        }
        if message.len() > self.buf.len() {
            return Err(WireError::PayloadTooLarge {
                size: message.len() - self.header_size,
                max: self.capacity(),
            });
        }
        self.buf[..message.len()].copy_from_slice(message);
        self.set_received(message.len())
    }

    /// The whole allocation, for transports that receive in place.
    /// Follow with [`Region::set_received`].
    pub fn receive_buf(&mut self) -> &mut [u8] {
        &mut self.buf[..]
    }

    /// Record that `message_len` bytes were received into [`Region::receive_buf`].
    pub fn set_received(&mut self, message_len: usize) -> Result<()> {
        if message_len < self.header_size {
            return Err(WireError::Truncated {
                len: message_len,
                needed: self.header_size,
            });
        }
        if message_len > self.buf.len() {
            return Err(WireError::PayloadTooLarge {
                size: message_len - self.header_size,
                max: self.capacity(),
            });
        }
        self.len = message_len - self.header_size;
        self.slots.clear();
        self.indexed = false;
        Ok(())
    }

    /// Structural check of the record chain against the logical length.
    pub fn validate(&self) -> bool {
        validate(self.params())
    }

    /// Walk the records.
    pub fn records(&self) -> Records<'_> {
        Records::new(self.params())
    }

    /// Find a record. Never copies; malformed chains read as "not found".
    pub fn find(&self, id: u32) -> Option<Record<'_>> {
        self.records()
            .map_while(|record| record.ok())
            .find(|record| record.id == id)
    }

    /// Read-only view of a parameter's data.
    pub fn get(&self, id: u32) -> Option<&[u8]> {
        self.find(id).map(|record| record.data)
    }

    /// Register or resize an output parameter and return its data bytes.
    ///
    /// Only the most recently registered parameter may change size: it
    /// may always shrink and may grow while capacity allows. Any other
    /// existing parameter can be rewritten at its original size only.
    /// With `data == None` new bytes are zeroed for the caller to fill.
    pub fn set(&mut self, id: u32, data: Option<&[u8]>, size: usize) -> Result<&mut [u8]> {
        if let Some(data) = data {
            if data.len() != size {
                return Err(WireError::DataSizeMismatch {
                    id,
                    data: data.len(),
                    declared: size,
                });
            }
        }
        self.ensure_index()?;

        let offset = match self.slots.iter().position(|slot| slot.id == id) {
            Some(pos) if pos + 1 == self.slots.len() => self.resize_last(size)?,
            Some(pos) => {
                let slot = self.slots[pos];
                if slot.size != size {
                    return Err(WireError::ParamLocked {
                        id,
                        existing: slot.size,
                    });
                }
                slot.offset
            }
            None => self.append(id, size)?,
        };

        let start = self.header_size + offset + RECORD_HEADER_SIZE;
        let dst = &mut self.buf[start..start + size];
        if let Some(data) = data {
            dst.copy_from_slice(data);
        }
        Ok(dst)
    }

    /// Write a typed value.
    pub fn set_value(&mut self, id: u32, value: ParamValue<'_>) -> Result<()> {
        let dst = self.set(id, None, value.encoded_len())?;
        value.write_into(dst);
        Ok(())
    }

    fn append(&mut self, id: u32, size: usize) -> Result<usize> {
        let offset = self.len;
        let needed = record_len(size);
        if offset + needed > self.capacity() {
            return Err(WireError::NoSpace {
                id,
                needed,
                available: self.capacity() - offset,
            });
        }

        let base = self.header_size + offset;
        self.buf[base..base + 4].copy_from_slice(&id.to_be_bytes());
        self.buf[base + 4..base + 8].copy_from_slice(&(size as u32).to_be_bytes());
        self.buf[base + 8..base + 12].copy_from_slice(&0u32.to_be_bytes());
        self.buf[base + RECORD_HEADER_SIZE..base + needed].fill(0);

        if let Some(last) = self.slots.last() {
            let link = self.header_size + last.offset + 8;
            self.buf[link..link + 4].copy_from_slice(&(offset as u32).to_be_bytes());
        }

        self.slots.push(Slot { id, offset, size });
        self.len = offset + needed;
        Ok(offset)
    }

    fn resize_last(&mut self, size: usize) -> Result<usize> {
        let Some(last) = self.slots.last().copied() else {
            return Err(WireError::MalformedParams);
        };
        let new_end = last.offset + record_len(size);
        if new_end > self.capacity() {
            return Err(WireError::NoSpace {
                id: last.id,
                needed: record_len(size),
                available: self.capacity() - last.offset,
            });
        }

        let base = self.header_size + last.offset;
        self.buf[base + 4..base + 8].copy_from_slice(&(size as u32).to_be_bytes());
        // Keep the tail (new bytes and padding) zeroed.
        let keep = last.size.min(size);
        self.buf[base + RECORD_HEADER_SIZE + keep..base + RECORD_HEADER_SIZE + pad4(size)].fill(0);

        if let Some(slot) = self.slots.last_mut() {
            slot.size = size;
        }
        self.len = new_end;
        Ok(last.offset)
    }

    // Rebuild the slot list for a region that was filled from the wire.
    fn ensure_index(&mut self) -> Result<()> {
        if self.indexed {
            return Ok(());
        }
        let mut slots = Vec::new();
        let mut end = 0;
        for record in self.records() {
            let record = record?;
            end = record.offset + record_len(record.data.len());
            slots.push(Slot {
                id: record.id,
                offset: record.offset,
                size: record.data.len(),
            });
        }
        self.slots = slots;
        self.len = end;
        self.indexed = true;
        Ok(())
    }

    pub fn set_i32(&mut self, id: u32, value: i32) -> Result<()> {
        self.set_value(id, ParamValue::I32(value))
    }

    pub fn set_u32(&mut self, id: u32, value: u32) -> Result<()> {
        self.set_value(id, ParamValue::U32(value))
    }

    pub fn set_i64(&mut self, id: u32, value: i64) -> Result<()> {
        self.set_value(id, ParamValue::I64(value))
    }

    pub fn set_u64(&mut self, id: u32, value: u64) -> Result<()> {
        self.set_value(id, ParamValue::U64(value))
    }

    pub fn set_f32(&mut self, id: u32, value: f32) -> Result<()> {
        self.set_value(id, ParamValue::F32(value))
    }

    pub fn set_f64(&mut self, id: u32, value: f64) -> Result<()> {
        self.set_value(id, ParamValue::F64(value))
    }

    pub fn set_str(&mut self, id: u32, value: &str) -> Result<()> {
        self.set_value(id, ParamValue::Str(value))
    }

    pub fn set_bytes(&mut self, id: u32, value: &[u8]) -> Result<()> {
        self.set(id, Some(value), value.len()).map(|_| ())
    }

    fn fixed<const N: usize>(&self, id: u32) -> Option<[u8; N]> {
        let data = self.get(id)?;
        let mut raw = [0u8; N];
        if data.len() != N {
            return None;
        }
        raw.copy_from_slice(data);
        Some(raw)
    }

    pub fn get_i32(&self, id: u32) -> i32 {
        self.fixed(id).map(i32::from_be_bytes).unwrap_or(0)
    }

    pub fn get_u32(&self, id: u32) -> u32 {
        self.fixed(id).map(u32::from_be_bytes).unwrap_or(0)
    }

    pub fn get_i64(&self, id: u32) -> i64 {
        self.fixed(id).map(i64::from_be_bytes).unwrap_or(0)
    }

    pub fn get_u64(&self, id: u32) -> u64 {
        self.fixed(id).map(u64::from_be_bytes).unwrap_or(0)
    }

    pub fn get_f32(&self, id: u32) -> f32 {
        self.fixed(id)
            .map(|raw| f32::from_bits(u32::from_be_bytes(raw)))
            .unwrap_or(0.0)
    }

    pub fn get_f64(&self, id: u32) -> f64 {
        self.fixed(id)
            .map(|raw| f64::from_bits(u64::from_be_bytes(raw)))
            .unwrap_or(0.0)
    }

    /// String parameter, or `""` when missing, unterminated or not UTF-8.
    pub fn get_str(&self, id: u32) -> &str {
        self.get(id)
            .and_then(|data| data.split_last())
            .filter(|(last, _)| **last == 0)
            .and_then(|(_, text)| std::str::from_utf8(text).ok())
            .unwrap_or("")
    }

    /// True when a parameter with this id is present.
    pub fn contains(&self, id: u32) -> bool {
        self.find(id).is_some()
    }
}

/// The output/input region pair owned by one worker or client.
#[derive(Debug, Clone)]
pub struct ParamBuffer {
    output: Region,
    input: Region,
}

impl Default for ParamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl ParamBuffer {
    /// Both regions get an envelope-sized header prefix.
    pub fn new(capacity: usize) -> Self {
        Self::with_header(HEADER_SIZE, capacity)
    }

    pub fn with_header(header_size: usize, capacity: usize) -> Self {
        Self {
            output: Region::new(header_size, capacity),
            input: Region::new(header_size, capacity),
        }
    }

    pub fn output(&self) -> &Region {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut Region {
        &mut self.output
    }

    pub fn input(&self) -> &Region {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut Region {
        &mut self.input
    }

    /// Both regions at once, for code that reads one while writing the other.
    pub fn split_mut(&mut self) -> (&Region, &mut Region) {
        (&self.input, &mut self.output)
    }

    /// Register or resize an output parameter. See [`Region::set`].
    pub fn set(&mut self, id: u32, data: Option<&[u8]>, size: usize) -> Result<&mut [u8]> {
        self.output.set(id, data, size)
    }

    /// Read an input parameter. See [`Region::get`].
    pub fn get(&self, id: u32) -> Option<&[u8]> {
        self.input.get(id)
    }

    /// Structural check of the input region.
    pub fn validate_input(&self) -> bool {
        self.input.validate()
    }

    /// Reset both logical lengths for the next exchange.
    pub fn reset(&mut self) {
        self.output.clear();
        self.input.clear();
    }

    /// Copy the output message verbatim into the input region.
    pub fn loopback(&mut self) -> Result<()> {
        let Self { output, input } = self;
        input.load(output.message())
    }
}
