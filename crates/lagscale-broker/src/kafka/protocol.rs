//! Decoding of consumer-group member blobs (Kafka consumer protocol).
//!
//! ```text
//! Subscription  => Version:int16 Topics:[string] UserData:bytes ...
//! Assignment    => Version:int16 [Topic:string Partitions:[int32]] UserData:bytes
//! ```
//!
//! Only the topic names are needed; trailing fields are ignored.

use std::collections::BTreeSet;

use crate::error::{BrokerError, BrokerResult};

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> BrokerResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(truncated());
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn i16(&mut self) -> BrokerResult<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> BrokerResult<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> BrokerResult<String> {
        let len = usize::try_from(self.i16()?).map_err(|_| truncated())?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| BrokerError::MetadataInconsistent(format!("member topic name: {e}")))
    }

    fn array_len(&mut self) -> BrokerResult<usize> {
        // A null array (-1) carries no entries.
        Ok(usize::try_from(self.i32()?).unwrap_or(0))
    }
}

fn truncated() -> BrokerError {
    BrokerError::MetadataInconsistent("truncated consumer protocol blob".to_string())
}

/// Topics listed in a member's assignment.
pub fn assignment_topics(blob: &[u8]) -> BrokerResult<BTreeSet<String>> {
    let mut r = Reader::new(blob);
    if blob.is_empty() {
        return Ok(BTreeSet::new());
    }
    r.i16()?;
    let mut topics = BTreeSet::new();
    for _ in 0..r.array_len()? {
        topics.insert(r.string()?);
        let partitions = r.array_len()?;
        r.take(partitions.saturating_mul(4))?;
    }
    Ok(topics)
}

/// Topics listed in a member's subscription metadata.
pub fn subscription_topics(blob: &[u8]) -> BrokerResult<BTreeSet<String>> {
    let mut r = Reader::new(blob);
    if blob.is_empty() {
        return Ok(BTreeSet::new());
    }
    r.i16()?;
    let mut topics = BTreeSet::new();
    for _ in 0..r.array_len()? {
        topics.insert(r.string()?);
    }
    Ok(topics)
}
