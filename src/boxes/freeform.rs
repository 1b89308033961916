//! iTunes-style freeform metadata items
//!
//! A freeform item is a `----` box with three children: `mean` (namespace),
//! `name` (item name) and `data` (type code, locale, value). Items are keyed
//! by `(namespace, name)`; a writer replaces the existing item with the same
//! identity and leaves every other item untouched.

use super::{BoxNode, BoxType};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

/// `data` type code for UTF-8 text
pub const TYPE_UTF8: u32 = 1;
/// `data` type code for opaque binary data
pub const TYPE_BINARY: u32 = 0;

/// One decoded `----` metadata item
#[derive(Debug, Clone, PartialEq)]
pub struct FreeformItem {
    pub namespace: String,
    pub name: String,
    pub type_code: u32,
    pub locale: u32,
    pub value: Vec<u8>,
}

impl FreeformItem {
    /// Create a UTF-8 text item
    pub fn utf8(namespace: &str, name: &str, value: &str) -> Self {
        FreeformItem {
            namespace: namespace.to_string(),
            name: name.to_string(),
            type_code: TYPE_UTF8,
            locale: 0,
            value: value.as_bytes().to_vec(),
        }
    }

    /// Create a binary item
    pub fn binary(namespace: &str, name: &str, value: Vec<u8>) -> Self {
        FreeformItem {
            namespace: namespace.to_string(),
            name: name.to_string(),
            type_code: TYPE_BINARY,
            locale: 0,
            value,
        }
    }

    /// The item's value as text; errors unless the type code says UTF-8
    pub fn value_str(&self) -> Result<&str> {
        if self.type_code != TYPE_UTF8 {
            return Err(Error::payload(format!(
                "freeform item {}:{} has type code {}, not UTF-8",
                self.namespace, self.name, self.type_code
            )));
        }
        std::str::from_utf8(&self.value).map_err(|_| {
            Error::payload(format!(
                "freeform item {}:{} declares UTF-8 but value is not valid",
                self.namespace, self.name
            ))
        })
    }

    /// Decode a parsed `----` box
    pub fn decode(node: &BoxNode<'_>) -> Result<Self> {
        if node.kind != BoxType::FREEFORM {
            return Err(Error::payload(format!(
                "expected a ---- box, found '{}'",
                node.kind
            )));
        }
        let namespace = tagged_string(node, BoxType::MEAN)?;
        let name = tagged_string(node, BoxType::NAME)?;
        let data = node
            .child(BoxType::DATA)
            .and_then(|c| c.leaf_data())
            .ok_or_else(|| Error::payload("freeform item missing data box"))?;
        if data.len() < 8 {
            return Err(Error::payload("freeform data box too short"));
        }
        Ok(FreeformItem {
            namespace,
            name,
            type_code: BigEndian::read_u32(&data[..4]),
            locale: BigEndian::read_u32(&data[4..8]),
            value: data[8..].to_vec(),
        })
    }

    /// Encode into a `----` box
    pub fn encode(&self) -> BoxNode<'static> {
        let mut mean = Vec::with_capacity(4 + self.namespace.len());
        mean.extend_from_slice(&[0u8; 4]);
        mean.extend_from_slice(self.namespace.as_bytes());

        let mut name = Vec::with_capacity(4 + self.name.len());
        name.extend_from_slice(&[0u8; 4]);
        name.extend_from_slice(self.name.as_bytes());

        let mut data = Vec::with_capacity(8 + self.value.len());
        data.write_u32::<BigEndian>(self.type_code).unwrap();
        data.write_u32::<BigEndian>(self.locale).unwrap();
        data.extend_from_slice(&self.value);

        BoxNode::container(
            BoxType::FREEFORM,
            vec![
                BoxNode::leaf(BoxType::MEAN, mean),
                BoxNode::leaf(BoxType::NAME, name),
                BoxNode::leaf(BoxType::DATA, data),
            ],
        )
    }
}

fn tagged_string(node: &BoxNode<'_>, kind: BoxType) -> Result<String> {
    let data = node
        .child(kind)
        .and_then(|c| c.leaf_data())
        .ok_or_else(|| Error::payload(format!("freeform item missing {} box", kind)))?;
    if data.len() < 4 {
        return Err(Error::payload(format!("freeform {} box too short", kind)));
    }
    String::from_utf8(data[4..].to_vec())
        .map_err(|_| Error::payload(format!("freeform {} is not valid UTF-8", kind)))
}

/// Find an item by identity under an `ilst` box
pub fn find_item(ilst: &BoxNode<'_>, namespace: &str, name: &str) -> Option<FreeformItem> {
    ilst.children()
        .iter()
        .filter(|c| c.kind == BoxType::FREEFORM)
        .filter_map(|c| FreeformItem::decode(c).ok())
        .find(|item| item.namespace == namespace && item.name == name)
}

/// Replace the item with the same `(namespace, name)` identity, or append it.
/// Items with other identities are preserved byte-for-byte.
pub fn replace_item(ilst: &mut BoxNode<'_>, item: &FreeformItem) {
    let encoded = item.encode();
    let children = match ilst.children_mut() {
        Some(children) => children,
        None => return,
    };
    let existing = children.iter().position(|c| {
        c.kind == BoxType::FREEFORM
            && matches!(
                FreeformItem::decode(c),
                Ok(found) if found.namespace == item.namespace && found.name == item.name
            )
    });
    match existing {
        Some(idx) => children[idx] = encoded,
        None => children.push(encoded),
    }
}

/// Remove the item with the given identity, returning whether one existed
pub fn remove_item(ilst: &mut BoxNode<'_>, namespace: &str, name: &str) -> bool {
    let children = match ilst.children_mut() {
        Some(children) => children,
        None => return false,
    };
    let before = children.len();
    children.retain(|c| {
        c.kind != BoxType::FREEFORM
            || !matches!(
                FreeformItem::decode(c),
                Ok(found) if found.namespace == namespace && found.name == name
            )
    });
    children.len() != before
}
