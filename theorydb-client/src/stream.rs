//! Change-feed image decoding.

use crate::dispatch::Dispatcher;
use serde::de::DeserializeOwned;
use theorydb_codec::decode;
use theorydb_core::{Item, ModelDescriptor, TheoryResult};

/// One change-feed record: the item images around a mutation, keyed by
/// attribute name. Either image may be absent (inserts have no old image,
/// deletes no new one).
#[derive(Debug, Clone, Default)]
pub struct StreamRecord {
    pub new_image: Option<Item>,
    pub old_image: Option<Item>,
}

impl StreamRecord {
    pub fn new(new_image: Option<Item>, old_image: Option<Item>) -> Self {
        Self {
            new_image,
            old_image,
        }
    }
}

/// Decode both images of a record through the codec and, for encrypted
/// models, the cryptographer. Missing images stay `None`; type mismatches
/// identify the offending attribute.
pub(crate) async fn decode_record<T: DeserializeOwned>(
    dispatcher: &Dispatcher,
    descriptor: &ModelDescriptor,
    record: &StreamRecord,
) -> TheoryResult<(Option<T>, Option<T>)> {
    dispatcher.encryption_gate(descriptor)?;
    let new_image = decode_image(dispatcher, descriptor, record.new_image.as_ref()).await?;
    let old_image = decode_image(dispatcher, descriptor, record.old_image.as_ref()).await?;
    Ok((new_image, old_image))
}

async fn decode_image<T: DeserializeOwned>(
    dispatcher: &Dispatcher,
    descriptor: &ModelDescriptor,
    image: Option<&Item>,
) -> TheoryResult<Option<T>> {
    let item = match image {
        Some(item) => item,
        None => return Ok(None),
    };
    let mut item = item.clone();
    dispatcher.decrypt_item(descriptor, &mut item).await?;
    decode(descriptor, &item).map(Some)
}
