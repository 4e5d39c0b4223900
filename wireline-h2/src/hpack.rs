//! HPACK header compression (RFC 7541).
//!
//! Full encoder and decoder: 61-entry static table, per-direction dynamic
//! tables, Huffman string literals, prefix integer codec. The session drives
//! both ends through a narrow adapter contract:
//!
//! - `Encoder::update_max_table_size` records a peer HEADER_TABLE_SIZE
//!   setting; the mandatory table-size-update instruction is emitted at the
//!   start of the next encoded block (RFC 7541 Section 4.2).
//! - `Decoder::set_max_header_list_size` bounds the decoded list using the
//!   RFC 7540 Section 10.5.1 accounting (name + value + 32 per field);
//!   exceeding it aborts the block.
//!
//! Every decode failure is a `Compression` error and fatal to the
//! connection: once a block fails mid-way the dynamic table is unreliable.

use std::collections::VecDeque;

use crate::error::H2Error;

/// A single header name-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size of this header field for table and list accounting
    /// (RFC 7541 Section 4.1): len(name) + len(value) + 32.
    fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

// -- HPACK prefix integer codec (RFC 7541 Section 5.1) --

pub(crate) fn encode_prefix_int(buf: &mut Vec<u8>, value: u64, prefix_bits: u8, pattern: u8) {
    let max = (1u64 << prefix_bits) - 1;
    if value < max {
        buf.push(pattern | value as u8);
    } else {
        buf.push(pattern | max as u8);
        let mut remaining = value - max;
        while remaining >= 128 {
            buf.push(0x80 | (remaining & 0x7f) as u8);
            remaining >>= 7;
        }
        buf.push(remaining as u8);
    }
}

pub(crate) fn decode_prefix_int(buf: &[u8], prefix_bits: u8) -> Option<(u64, usize)> {
    if buf.is_empty() {
        return None;
    }
    let max = (1u64 << prefix_bits) - 1;
    let value = u64::from(buf[0]) & max;
    if value < max {
        return Some((value, 1));
    }
    let mut value = max;
    let mut shift = 0u32;
    for (i, &b) in buf[1..].iter().enumerate() {
        value += u64::from(b & 0x7f) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            return Some((value, i + 2));
        }
        if shift > 56 {
            return None; // overflow protection
        }
    }
    None // incomplete
}

// -- Static table (RFC 7541 Appendix A) --

/// HPACK static table entries: (name, value). 61 entries indexed 1..61.
const STATIC_TABLE: &[(&[u8], &[u8])] = &[
    (b":authority", b""),                   // 1
    (b":method", b"GET"),                   // 2
    (b":method", b"POST"),                  // 3
    (b":path", b"/"),                       // 4
    (b":path", b"/index.html"),             // 5
    (b":scheme", b"http"),                  // 6
    (b":scheme", b"https"),                 // 7
    (b":status", b"200"),                   // 8
    (b":status", b"204"),                   // 9
    (b":status", b"206"),                   // 10
    (b":status", b"304"),                   // 11
    (b":status", b"400"),                   // 12
    (b":status", b"404"),                   // 13
    (b":status", b"500"),                   // 14
    (b"accept-charset", b""),               // 15
    (b"accept-encoding", b"gzip, deflate"), // 16
    (b"accept-language", b""),              // 17
    (b"accept-ranges", b""),                // 18
    (b"accept", b""),                       // 19
    (b"access-control-allow-origin", b""),  // 20
    (b"age", b""),                          // 21
    (b"allow", b""),                        // 22
    (b"authorization", b""),                // 23
    (b"cache-control", b""),                // 24
    (b"content-disposition", b""),          // 25
    (b"content-encoding", b""),             // 26
    (b"content-language", b""),             // 27
    (b"content-length", b""),               // 28
    (b"content-location", b""),             // 29
    (b"content-range", b""),                // 30
    (b"content-type", b""),                 // 31
    (b"cookie", b""),                       // 32
    (b"date", b""),                         // 33
    (b"etag", b""),                         // 34
    (b"expect", b""),                       // 35
    (b"expires", b""),                      // 36
    (b"from", b""),                         // 37
    (b"host", b""),                         // 38
    (b"if-match", b""),                     // 39
    (b"if-modified-since", b""),            // 40
    (b"if-none-match", b""),                // 41
    (b"if-range", b""),                     // 42
    (b"if-unmodified-since", b""),          // 43
    (b"last-modified", b""),                // 44
    (b"link", b""),                         // 45
    (b"location", b""),                     // 46
    (b"max-forwards", b""),                 // 47
    (b"proxy-authenticate", b""),           // 48
    (b"proxy-authorization", b""),          // 49
    (b"range", b""),                        // 50
    (b"referer", b""),                      // 51
    (b"refresh", b""),                      // 52
    (b"retry-after", b""),                  // 53
    (b"server", b""),                       // 54
    (b"set-cookie", b""),                   // 55
    (b"strict-transport-security", b""),    // 56
    (b"transfer-encoding", b""),            // 57
    (b"user-agent", b""),                   // 58
    (b"vary", b""),                         // 59
    (b"via", b""),                          // 60
    (b"www-authenticate", b""),             // 61
];

/// Find a static table entry matching both name and value.
/// Returns the 1-based index if found.
fn find_static_name_value(name: &[u8], value: &[u8]) -> Option<usize> {
    STATIC_TABLE
        .iter()
        .position(|(n, v)| *n == name && *v == value)
        .map(|i| i + 1) // HPACK static table is 1-indexed
}

/// Find a static table entry matching just the name.
/// Returns the 1-based index of the first match.
fn find_static_name(name: &[u8]) -> Option<usize> {
    STATIC_TABLE
        .iter()
        .position(|(n, _)| *n == name)
        .map(|i| i + 1)
}

// -- Dynamic table --

/// HPACK dynamic table (RFC 7541 Section 2.3.2).
///
/// Entries are stored newest-first. Index 0 of the VecDeque corresponds to
/// HPACK dynamic table index (static_table_len + 1).
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Get an entry by 0-based dynamic table index.
    pub fn get(&self, index: usize) -> Option<&HeaderField> {
        self.entries.get(index)
    }

    /// Insert a new entry at the beginning of the dynamic table.
    pub fn insert(&mut self, field: HeaderField) {
        let entry_size = field.size();
        // Evict entries to make room (RFC 7541 Section 4.4).
        while self.size + entry_size > self.max_size && !self.entries.is_empty() {
            if let Some(evicted) = self.entries.pop_back() {
                self.size -= evicted.size();
            }
        }
        // An entry larger than the table empties it and is not inserted.
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.entries.push_front(field);
        self.size += entry_size;
    }

    /// Update the maximum table size, evicting entries as needed.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.size > self.max_size && !self.entries.is_empty() {
            if let Some(evicted) = self.entries.pop_back() {
                self.size -= evicted.size();
            }
        }
    }

    /// Find a dynamic table entry matching both name and value.
    /// Returns the HPACK index (62 + position) if found.
    fn find_name_value(&self, name: &[u8], value: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|h| h.name == name && h.value == value)
            .map(|i| i + 62) // 61 static + 1-indexed
    }

    /// Find a dynamic table entry matching just the name.
    /// Returns the HPACK index (62 + position) if found.
    fn find_name(&self, name: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|h| h.name == name)
            .map(|i| i + 62)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// -- String literal encoding/decoding --

/// Encode a string literal, Huffman-compressed when that is shorter.
fn encode_string_literal(buf: &mut Vec<u8>, data: &[u8]) {
    let huf_len = crate::huffman::encoded_len(data);
    if huf_len < data.len() {
        // Huffman is shorter -- set H bit (0x80).
        encode_prefix_int(buf, huf_len as u64, 7, 0x80);
        crate::huffman::encode(data, buf);
    } else {
        encode_prefix_int(buf, data.len() as u64, 7, 0x00);
        buf.extend_from_slice(data);
    }
}

/// Decode a string literal (Huffman or raw).
fn decode_string_literal(buf: &[u8]) -> Result<(Vec<u8>, usize), H2Error> {
    if buf.is_empty() {
        return Err(H2Error::Compression);
    }
    let huffman = buf[0] & 0x80 != 0;
    let (str_len, n) = decode_prefix_int(buf, 7).ok_or(H2Error::Compression)?;
    let str_len = str_len as usize;
    let total = n + str_len;
    if buf.len() < total {
        return Err(H2Error::Compression);
    }
    let data = &buf[n..total];
    let value = if huffman {
        crate::huffman::decode(data)?
    } else {
        data.to_vec()
    };
    Ok((value, total))
}

// -- Encoder --

/// HPACK encoder with dynamic table.
pub struct Encoder {
    dynamic_table: DynamicTable,
    /// Table size selected by a peer HEADER_TABLE_SIZE setting but not yet
    /// announced in a block. Emitted first thing on the next `encode`.
    pending_size_update: Option<usize>,
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            dynamic_table: DynamicTable::new(max_table_size),
            pending_size_update: None,
        }
    }

    /// Encode a list of headers into an HPACK header block.
    pub fn encode(&mut self, headers: &[HeaderField], buf: &mut Vec<u8>) {
        if let Some(new_size) = self.pending_size_update.take() {
            // Dynamic table size update (RFC 7541 Section 6.3):
            // pattern 001xxxxx, 5-bit prefix.
            self.dynamic_table.set_max_size(new_size);
            encode_prefix_int(buf, new_size as u64, 5, 0x20);
        }
        for header in headers {
            self.encode_header(header, buf);
        }
    }

    fn encode_header(&mut self, header: &HeaderField, buf: &mut Vec<u8>) {
        // 1. Exact match in the static table.
        if let Some(index) = find_static_name_value(&header.name, &header.value) {
            // Indexed header field (RFC 7541 Section 6.1): pattern 1xxxxxxx.
            encode_prefix_int(buf, index as u64, 7, 0x80);
            return;
        }

        // 2. Exact match in the dynamic table.
        if let Some(index) = self
            .dynamic_table
            .find_name_value(&header.name, &header.value)
        {
            encode_prefix_int(buf, index as u64, 7, 0x80);
            return;
        }

        // 3. Name match (static then dynamic) -- literal with incremental
        // indexing (RFC 7541 Section 6.2.1): pattern 01xxxxxx.
        if let Some(name_index) =
            find_static_name(&header.name).or_else(|| self.dynamic_table.find_name(&header.name))
        {
            encode_prefix_int(buf, name_index as u64, 6, 0x40);
            encode_string_literal(buf, &header.value);
            self.dynamic_table.insert(header.clone());
            return;
        }

        // 4. Literal with incremental indexing, new name (6-bit index = 0).
        buf.push(0x40);
        encode_string_literal(buf, &header.name);
        encode_string_literal(buf, &header.value);
        self.dynamic_table.insert(header.clone());
    }

    /// Honor a peer HEADER_TABLE_SIZE setting. The size takes effect (and
    /// is announced) at the start of the next encoded block.
    pub fn update_max_table_size(&mut self, new_size: usize) {
        self.pending_size_update = Some(new_size);
    }
}

// -- Decoder --

/// HPACK decoder with dynamic table.
pub struct Decoder {
    dynamic_table: DynamicTable,
    /// Upper bound for table-size updates the peer's encoder may announce,
    /// set by our HEADER_TABLE_SIZE setting.
    max_table_size: usize,
    /// Abort threshold for one decoded list (RFC 7540 Section 10.5.1).
    max_header_list_size: Option<usize>,
}

impl Decoder {
    pub fn new(max_table_size: usize) -> Self {
        Self {
            dynamic_table: DynamicTable::new(max_table_size),
            max_table_size,
            max_header_list_size: None,
        }
    }

    /// Decode an HPACK header block.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Vec<HeaderField>, H2Error> {
        let mut headers = Vec::new();
        let mut list_size = 0usize;
        let mut pos = 0;

        while pos < buf.len() {
            let first = buf[pos];

            if first & 0x80 != 0 {
                // Indexed header field (Section 6.1): pattern 1xxxxxxx.
                let (index, n) =
                    decode_prefix_int(&buf[pos..], 7).ok_or(H2Error::Compression)?;
                pos += n;
                let field = self.get_indexed(index as usize)?;
                self.push_field(&mut headers, &mut list_size, field)?;
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing (Section 6.2.1): 01xxxxxx.
                let (name, value, n) = self.decode_literal(&buf[pos..], 6)?;
                pos += n;
                let field = HeaderField { name, value };
                self.dynamic_table.insert(field.clone());
                self.push_field(&mut headers, &mut list_size, field)?;
            } else if first & 0x20 != 0 {
                // Dynamic table size update (Section 6.3): pattern 001xxxxx.
                let (new_size, n) =
                    decode_prefix_int(&buf[pos..], 5).ok_or(H2Error::Compression)?;
                pos += n;
                let new_size = new_size as usize;
                if new_size > self.max_table_size {
                    return Err(H2Error::Compression);
                }
                self.dynamic_table.set_max_size(new_size);
            } else {
                // Literal never indexed (Section 6.2.3, 0001xxxx) or without
                // indexing (Section 6.2.2, 0000xxxx): neither touches the
                // dynamic table.
                let (name, value, n) = self.decode_literal(&buf[pos..], 4)?;
                pos += n;
                self.push_field(&mut headers, &mut list_size, HeaderField { name, value })?;
            }
        }

        Ok(headers)
    }

    /// Decode a literal representation's name (indexed or inline) and value.
    /// Returns (name, value, bytes consumed).
    fn decode_literal(
        &self,
        buf: &[u8],
        prefix_bits: u8,
    ) -> Result<(Vec<u8>, Vec<u8>, usize), H2Error> {
        let (name_index, mut pos) =
            decode_prefix_int(buf, prefix_bits).ok_or(H2Error::Compression)?;
        let name = if name_index > 0 {
            self.get_name(name_index as usize)?
        } else {
            let (name, consumed) = decode_string_literal(&buf[pos..])?;
            pos += consumed;
            name
        };
        let (value, consumed) = decode_string_literal(&buf[pos..])?;
        pos += consumed;
        Ok((name, value, pos))
    }

    fn push_field(
        &self,
        headers: &mut Vec<HeaderField>,
        list_size: &mut usize,
        field: HeaderField,
    ) -> Result<(), H2Error> {
        *list_size += field.size();
        if let Some(limit) = self.max_header_list_size
            && *list_size > limit
        {
            return Err(H2Error::Compression);
        }
        headers.push(field);
        Ok(())
    }

    /// Look up an indexed header field (static or dynamic).
    fn get_indexed(&self, index: usize) -> Result<HeaderField, H2Error> {
        if index == 0 {
            return Err(H2Error::Compression);
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            Ok(HeaderField {
                name: name.to_vec(),
                value: value.to_vec(),
            })
        } else {
            let dyn_index = index - STATIC_TABLE.len() - 1;
            self.dynamic_table
                .get(dyn_index)
                .cloned()
                .ok_or(H2Error::Compression)
        }
    }

    /// Look up only the name from an indexed entry.
    fn get_name(&self, index: usize) -> Result<Vec<u8>, H2Error> {
        if index == 0 {
            return Err(H2Error::Compression);
        }
        if index <= STATIC_TABLE.len() {
            Ok(STATIC_TABLE[index - 1].0.to_vec())
        } else {
            let dyn_index = index - STATIC_TABLE.len() - 1;
            self.dynamic_table
                .get(dyn_index)
                .map(|h| h.name.clone())
                .ok_or(H2Error::Compression)
        }
    }

    /// Bound for table-size updates the peer may announce (our
    /// HEADER_TABLE_SIZE setting). The actual resize happens when the
    /// update instruction arrives in a header block.
    pub fn set_max_table_size(&mut self, max_size: usize) {
        self.max_table_size = max_size;
    }

    /// Abort threshold for a single decoded header list.
    pub fn set_max_header_list_size(&mut self, limit: Option<usize>) {
        self.max_header_list_size = limit;
    }
}
