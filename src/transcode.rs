//! Conversion between Gmail's filter export and the flat rule list
//!
//! Gmail exports filters as an Atom feed (`mailFilters.xml`) with one
//! `<entry>` per condition/label pair:
//!
//! ```xml
//! <entry>
//!   <apps:property name='from' value='alerts@example.com'/>
//!   <apps:property name='label' value='Alerts'/>
//!   <apps:property name='sizeOperator' value='s_sl'/>
//! </entry>
//! ```
//!
//! A filter that applies two labels is exported as two entries with
//! identical conditions. Importing coalesces such adjacent entries
//! back into one rule with a space-separated `label`; exporting splits
//! them again.

use crate::error::{Error, Result};
use crate::rule::{FlatRule, LABEL, PropValue};
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::debug;

const NS_FEED: &str = "http://www.w3.org/2005/Atom";
const NS_APPS: &str = "http://schemas.google.com/apps/2006";

/// Properties copied verbatim between the export and the rule list
/// (everything except the label), in export order.
pub const BASIC_PROPS: [&str; 11] = [
    "from",
    "to",
    "hasTheWord",
    "shouldArchive",
    "shouldMarkAsRead",
    "shouldNeverMarkAsImportant",
    "shouldNeverSpam",
    "shouldStar",
    "shouldTrash",
    "smartLabelToApply",
    "subject",
];

/// One exported filter entry: its properties in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterEntry {
    pub properties: Vec<(String, String)>,
}

impl FilterEntry {
    /// First value of the named property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The entry's label, if it has one.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.get(LABEL)
    }
}

/// A parsed or generated filter export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportDocument {
    /// Export creation time, recorded once for the whole feed.
    pub updated: Option<DateTime<Utc>>,
    pub entries: Vec<FilterEntry>,
}

/// Whether importing merges adjacent entries that differ only by label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Collapse {
    #[default]
    Adjacent,
    Never,
}

impl ExportDocument {
    /// Parse an Atom filter export.
    ///
    /// Namespace prefixes are ignored: any `property` element inside an
    /// `entry` contributes its `name`/`value` attributes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] if the XML is malformed.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut doc = Self::default();
        let mut current: Option<FilterEntry> = None;
        let mut element = Vec::new();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = e.local_name().as_ref().to_vec();
                    if name == b"entry" {
                        current = Some(FilterEntry::default());
                    } else if name == b"property"
                        && let Some(entry) = current.as_mut()
                    {
                        push_property(entry, &e)?;
                    }
                    element = name;
                }
                Ok(Event::Empty(e)) => {
                    if e.local_name().as_ref() == b"property"
                        && let Some(entry) = current.as_mut()
                    {
                        push_property(entry, &e)?;
                    }
                }
                Ok(Event::Text(t)) => {
                    if element == b"updated" && current.is_none() {
                        let text = t.unescape().map_err(|e| Error::Export(e.to_string()))?;
                        doc.updated = DateTime::parse_from_rfc3339(text.trim())
                            .ok()
                            .map(|dt| dt.with_timezone(&Utc));
                    }
                }
                Ok(Event::End(e)) => {
                    if e.local_name().as_ref() == b"entry"
                        && let Some(entry) = current.take()
                    {
                        doc.entries.push(entry);
                    }
                    element.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(Error::Export(format!(
                        "XML parse error at position {}: {e}",
                        reader.buffer_position()
                    )));
                }
                _ => {}
            }
            buf.clear();
        }

        debug!("parsed {} filter entries", doc.entries.len());
        Ok(doc)
    }

    /// Render the document as an Atom feed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] if writing fails.
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut feed = BytesStart::new("feed");
        feed.push_attribute(("xmlns", NS_FEED));
        feed.push_attribute(("xmlns:apps", NS_APPS));
        write(&mut writer, Event::Start(feed))?;
        write_text_element(&mut writer, "title", "Mail Filters")?;
        if let Some(updated) = self.updated {
            write_text_element(&mut writer, "updated", &updated.to_rfc3339())?;
        }

        for entry in &self.entries {
            write(&mut writer, Event::Start(BytesStart::new("entry")))?;
            write_text_element(&mut writer, "title", "Mail Filter")?;

            let mut category = BytesStart::new("category");
            category.push_attribute(("term", "filter"));
            write(&mut writer, Event::Empty(category))?;
            write(&mut writer, Event::Empty(BytesStart::new("content")))?;

            for (name, value) in &entry.properties {
                let mut prop = BytesStart::new("apps:property");
                prop.push_attribute(("name", name.as_str()));
                prop.push_attribute(("value", value.as_str()));
                write(&mut writer, Event::Empty(prop))?;
            }

            write(&mut writer, Event::End(BytesEnd::new("entry")))?;
        }

        write(&mut writer, Event::End(BytesEnd::new("feed")))?;

        let mut xml = String::from_utf8(writer.into_inner())
            .map_err(|e| Error::Export(e.to_string()))?;
        xml.push('\n');
        Ok(xml)
    }
}

fn push_property(entry: &mut FilterEntry, element: &BytesStart<'_>) -> Result<()> {
    let mut name = None;
    let mut value = None;

    for attr in element.attributes() {
        let attr = attr.map_err(|e| Error::Export(e.to_string()))?;
        let text = attr
            .unescape_value()
            .map_err(|e| Error::Export(e.to_string()))?
            .into_owned();
        match attr.key.local_name().as_ref() {
            b"name" => name = Some(text),
            b"value" => value = Some(text),
            _ => {}
        }
    }

    if let Some(name) = name {
        entry.properties.push((name, value.unwrap_or_default()));
    }
    Ok(())
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| Error::Export(e.to_string()))
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

/// Whether two rules have identical conditions and both carry a label,
/// making them candidates for label coalescing.
#[must_use]
pub fn same_condition(a: &FlatRule, b: &FlatRule) -> bool {
    if !(a.contains(LABEL) && b.contains(LABEL)) {
        return false;
    }
    BASIC_PROPS.iter().all(|prop| a.get(prop) == b.get(prop))
}

/// Convert an export document into the flat rule list.
///
/// `size*` properties are dropped. With [`Collapse::Adjacent`], an
/// entry whose condition matches the previously emitted rule only adds
/// its label to that rule; earlier rules are never revisited.
#[must_use]
pub fn to_flat(doc: &ExportDocument, collapse: Collapse) -> Vec<FlatRule> {
    let mut rules: Vec<FlatRule> = Vec::new();

    for entry in &doc.entries {
        let mut rule = FlatRule::new();
        for (name, value) in &entry.properties {
            if name.starts_with("size") {
                continue;
            }
            rule.insert(name, PropValue::from_export(value));
        }

        if collapse == Collapse::Adjacent
            && let Some(prev) = rules.last_mut()
            && same_condition(prev, &rule)
            && let (Some(a), Some(b)) = (prev.get(LABEL), rule.get(LABEL))
        {
            let merged = format!("{a} {b}");
            debug!("coalescing label into previous filter: {}", merged);
            prev.insert(LABEL, PropValue::Text(merged));
            continue;
        }

        rules.push(rule);
    }

    rules
}

/// Convert the flat rule list into an export document.
///
/// Each label of a rule becomes its own entry; a rule without labels
/// becomes exactly one entry. Only [`BASIC_PROPS`] and the label are
/// exported.
#[must_use]
pub fn to_export(rules: &[FlatRule], updated: DateTime<Utc>) -> ExportDocument {
    let mut entries = Vec::new();

    for rule in rules {
        let base: Vec<(String, String)> = BASIC_PROPS
            .iter()
            .filter_map(|prop| rule.get(prop).map(|v| ((*prop).to_string(), v.to_string())))
            .collect();

        let labels = rule.labels();
        if labels.is_empty() {
            entries.push(FilterEntry { properties: base });
            continue;
        }
        for label in labels {
            let mut properties = base.clone();
            properties.push((LABEL.to_string(), label));
            entries.push(FilterEntry { properties });
        }
    }

    ExportDocument {
        updated: Some(updated),
        entries,
    }
}
