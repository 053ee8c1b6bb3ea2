//! The output tree produced by dissecting one transfer.

use std::fmt::Write;
use std::ops::Range;

use itertools::Itertools;
use serde::Serialize;

use crate::fields::{Base, FieldId, FieldSpec};
use crate::util::Bytes;

/// Bytes fields show at most this many bytes before truncating.
const MAX_BYTES_SHOWN: usize = 32;

/// The top-level group a dissection is rooted under.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Group {
    Control,
    Bulk,
    Interrupt,
}

impl Group {
    pub fn name(&self) -> &'static str {
        match self {
            Group::Control => "Control",
            Group::Bulk => "Bulk",
            Group::Interrupt => "Interrupt",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Severity {
    Warning,
}

/// A diagnostic attached to a field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Advisory {
    pub severity: Severity,
    pub message: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FieldValue {
    Uint(u32),
    Bytes(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DecodedField {
    pub id: FieldId,
    pub name: &'static str,
    pub abbrev: &'static str,
    pub base: Base,
    #[serde(skip)]
    pub mask: Option<u32>,
    #[serde(skip)]
    pub width: usize,
    pub value: FieldValue,
    pub label: Option<&'static str>,
    /// Byte range of the field within the transfer payload.
    pub range: Range<usize>,
    pub children: Vec<DecodedField>,
    pub advisory: Option<Advisory>,
}

impl DecodedField {
    pub fn uint(spec: &FieldSpec, value: u32, range: Range<usize>) -> Self {
        DecodedField {
            id: spec.id,
            name: spec.name,
            abbrev: spec.abbrev,
            base: spec.base,
            mask: spec.mask,
            width: spec.width,
            value: FieldValue::Uint(value),
            label: spec.label(value),
            range,
            children: Vec::new(),
            advisory: None,
        }
    }

    pub fn bytes(spec: &FieldSpec, bytes: &[u8], range: Range<usize>) -> Self {
        DecodedField {
            id: spec.id,
            name: spec.name,
            abbrev: spec.abbrev,
            base: spec.base,
            mask: spec.mask,
            width: range.len(),
            value: FieldValue::Bytes(bytes.to_vec()),
            label: None,
            range,
            children: Vec::new(),
            advisory: None,
        }
    }

    pub fn with_children(mut self, children: Vec<DecodedField>) -> Self {
        self.children = children;
        self
    }

    pub fn with_advisory(mut self, severity: Severity, message: &'static str)
        -> Self
    {
        self.advisory = Some(Advisory { severity, message });
        self
    }

    /// The numeric value, if this is a numeric field.
    pub fn uint_value(&self) -> Option<u32> {
        match self.value {
            FieldValue::Uint(value) => Some(value),
            FieldValue::Bytes(_) => None,
        }
    }

    pub fn bytes_value(&self) -> Option<&[u8]> {
        match &self.value {
            FieldValue::Bytes(bytes) => Some(bytes),
            FieldValue::Uint(_) => None,
        }
    }

    /// Find this field or a descendant with the given ID.
    pub fn find(&self, id: FieldId) -> Option<&DecodedField> {
        if self.id == id {
            Some(self)
        } else {
            self.children.iter().find_map(|child| child.find(id))
        }
    }

    /// One line of text describing this field, without its children.
    pub fn text(&self) -> String {
        let mut text = String::new();
        if let (Some(mask), FieldValue::Uint(value)) = (self.mask, &self.value) {
            let raw = value << mask.trailing_zeros();
            text.push_str(&bit_pattern(mask, raw, self.width * 8));
            text.push_str(" = ");
        }
        text.push_str(self.name);
        text.push_str(": ");
        text.push_str(&self.value_text());
        if let Some(advisory) = &self.advisory {
            write!(text, " [{:?}: {}]", advisory.severity, advisory.message)
                .ok();
        }
        text
    }

    fn value_text(&self) -> String {
        let value = match &self.value {
            FieldValue::Bytes(bytes) =>
                return Bytes::first(MAX_BYTES_SHOWN, bytes).to_string(),
            FieldValue::Uint(value) => *value,
        };
        let number = match (self.mask, self.base) {
            (Some(_), _) | (None, Base::Dec) => format!("{value}"),
            (None, _) => self.hex(value),
        };
        match self.label {
            Some(label) => format!("{label} ({number})"),
            None => number,
        }
    }

    fn hex(&self, value: u32) -> String {
        format!("0x{:0width$X}", value, width = self.width.max(1) * 2)
    }

    fn write_tree(&self, out: &mut String, depth: usize) {
        writeln!(out, "{}{}", "    ".repeat(depth), self.text()).ok();
        for child in &self.children {
            child.write_tree(out, depth + 1);
        }
    }
}

/// Render the bits of a masked value, with dots for bits outside the mask.
fn bit_pattern(mask: u32, raw: u32, bits: usize) -> String {
    let chars: Vec<char> = (0..bits)
        .rev()
        .map(|bit| match (mask >> bit & 1, raw >> bit & 1) {
            (0, _) => '.',
            (_, 0) => '0',
            (..) => '1',
        })
        .collect();
    chars
        .chunks(4)
        .map(|nibble| nibble.iter().collect::<String>())
        .join(" ")
}

/// The decoded fields of one KitProg transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Dissection {
    pub group: Group,
    pub fields: Vec<DecodedField>,
}

impl Dissection {
    pub fn new(group: Group, fields: Vec<DecodedField>) -> Self {
        Dissection { group, fields }
    }

    /// Find a field anywhere in the tree.
    pub fn field(&self, id: FieldId) -> Option<&DecodedField> {
        self.fields.iter().find_map(|field| field.find(id))
    }

    /// Iterate over all fields in the tree, parents before children.
    pub fn walk(&self) -> impl Iterator<Item=&DecodedField> {
        let mut stack: Vec<&DecodedField> = self.fields.iter().rev().collect();
        std::iter::from_fn(move || {
            let field = stack.pop()?;
            stack.extend(field.children.iter().rev());
            Some(field)
        })
    }

    pub fn advisories(&self) -> impl Iterator<Item=&Advisory> {
        self.walk().filter_map(|field| field.advisory.as_ref())
    }
}

impl std::fmt::Display for Dissection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut out = format!("KitProg {}\n", self.group.name());
        for field in &self.fields {
            field.write_tree(&mut out, 1);
        }
        write!(f, "{}", out.trim_end())
    }
}
