/// Inclusive byte span of a single-range request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    Invalid,
    Unsatisfiable,
}

/// What to send for a `Range` header value, if any. Malformed headers are
/// ignored and the whole body is served; unsatisfiable ones are reported.
pub fn requested_range(header: Option<&str>, size: u64) -> Result<Option<ByteRange>, RangeError> {
    match header {
        None => Ok(None),
        Some(value) => match parse_range_header(value, size) {
            Ok(range) => Ok(Some(range)),
            Err(RangeError::Invalid) => Ok(None),
            Err(RangeError::Unsatisfiable) => Err(RangeError::Unsatisfiable),
        },
    }
}

pub fn parse_range_header(value: &str, size: u64) -> Result<ByteRange, RangeError> {
    let set = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Invalid)?
        .trim();
    if set.contains(',') {
        return Err(RangeError::Invalid);
    }
    if size == 0 {
        return Err(RangeError::Unsatisfiable);
    }

    let (start_str, end_str) = set.split_once('-').ok_or(RangeError::Invalid)?;
    let number = |text: &str| text.trim().parse::<u64>().map_err(|_| RangeError::Invalid);

    if start_str.trim().is_empty() {
        let suffix = number(end_str)?;
        if suffix == 0 {
            return Err(RangeError::Unsatisfiable);
        }
        return Ok(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        });
    }

    let start = number(start_str)?;
    if start >= size {
        return Err(RangeError::Unsatisfiable);
    }
    let end = if end_str.trim().is_empty() {
        size - 1
    } else {
        let end = number(end_str)?;
        if end < start {
            return Err(RangeError::Invalid);
        }
        end.min(size - 1)
    };
    Ok(ByteRange { start, end })
}
