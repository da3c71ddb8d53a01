use log::warn;
use metrics::counter;

use super::{ReadResult, SubResult};
use crate::codec::Codec;
use crate::store::StreamBatch;

/// Decodes every entry of `batches` into a [`SubResult`].
///
/// An entry without fields was trimmed by the store and yields
/// [`StreamError::Trimmed`](crate::errors::StreamError::Trimmed) without a decode
/// attempt. A key that came back with no entries maps to an empty `Vec`.
pub fn translate<T>(batches: Vec<StreamBatch>, codec: &Codec<T>) -> ReadResult<T> {
    let mut result = ReadResult::with_capacity(batches.len());

    for batch in batches {
        let mut trimmed = 0u64;
        let mut failed = 0u64;
        let total = batch.entries.len() as u64;

        let mut decoded = Vec::with_capacity(batch.entries.len());
        for entry in batch.entries {
            if entry.fields.is_empty() {
                trimmed += 1;
                decoded.push(SubResult::trimmed(entry.id));
                continue;
            }
            match codec.decode(&entry.fields) {
                Ok(value) => decoded.push(SubResult::ok(entry.id, value)),
                Err(e) => {
                    warn!("Failed to decode entry {} on {}: {}", entry.id, batch.key, e);
                    failed += 1;
                    decoded.push(SubResult::err(entry.id, e));
                }
            }
        }

        counter!("qstream_read_entries_total", "key" => batch.key.clone()).increment(total);
        if trimmed > 0 {
            counter!("qstream_trimmed_total", "key" => batch.key.clone()).increment(trimmed);
        }
        if failed > 0 {
            counter!("qstream_decode_failures_total", "key" => batch.key.clone()).increment(failed);
        }

        result.insert(batch.key, decoded);
    }

    result
}
