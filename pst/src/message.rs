//! Attachment and recipient views.
//!
//! A thin mapping of well-known property identifiers onto typed fields.
//! Attachments live in the message's sub-node tree as property contexts
//! (NID type 0x05), summarized by the attachment table (sub-node 0x671).
//! Recipients are rows of the recipient table (sub-node 0x692).

use std::collections::HashSet;

use crate::error::{Error, NodeFailure};
use crate::ltp::{FileTime, PropertyContext, PropertyView, tags};
use crate::ndb::{Nid, NodeRef, NodeType, ReadRange};
use crate::store::Pst;

/// How an attachment's content is stored (`PidTagAttachMethod`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentMethod {
    None,
    ByValue,
    ByReference,
    ByReferenceOnly,
    EmbeddedMessage,
    Storage,
    Unknown(i32),
}

impl AttachmentMethod {
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::None,
            1 => Self::ByValue,
            2 => Self::ByReference,
            4 => Self::ByReferenceOnly,
            5 => Self::EmbeddedMessage,
            6 => Self::Storage,
            other => Self::Unknown(other),
        }
    }
}

/// `PidTagAttachFlags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttachmentFlags(pub u32);

impl AttachmentFlags {
    const INVISIBLE_IN_HTML: u32 = 0x1;
    const INVISIBLE_IN_RTF: u32 = 0x2;
    const RENDERED_IN_BODY: u32 = 0x4;

    #[must_use]
    pub const fn invisible_in_html(self) -> bool {
        self.0 & Self::INVISIBLE_IN_HTML != 0
    }

    #[must_use]
    pub const fn invisible_in_rtf(self) -> bool {
        self.0 & Self::INVISIBLE_IN_RTF != 0
    }

    #[must_use]
    pub const fn rendered_in_body(self) -> bool {
        self.0 & Self::RENDERED_IN_BODY != 0
    }
}

/// One attachment's metadata and, for by-value attachments, its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Best available name, de-duplicated within one message by
    /// [`Pst::attachments`].
    pub name: String,
    pub method: AttachmentMethod,
    pub size: Option<u32>,
    pub filename: Option<String>,
    pub long_filename: Option<String>,
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    pub content_id: Option<String>,
    pub display_name: Option<String>,
    /// Source path of a by-reference attachment.
    pub pathname: Option<String>,
    pub long_pathname: Option<String>,
    pub content_location: Option<String>,
    /// Position among the MIME parts of the original message.
    pub mime_sequence: Option<i32>,
    pub rendering_position: Option<i32>,
    pub flags: AttachmentFlags,
    pub creation_time: Option<FileTime>,
    /// Row ID and version; set on attachment table rows.
    pub ltp_row_id: Option<u32>,
    pub ltp_row_version: Option<u32>,
    pub data: Option<Vec<u8>>,
}

impl Attachment {
    const FALLBACK_NAME: &'static str = "attachment";

    /// Map an attachment property context or attachment table row.
    pub fn from_view(view: &impl PropertyView) -> Self {
        let long_filename = non_empty(view.string(tags::ATTACH_LONG_FILENAME));
        let filename = non_empty(view.string(tags::ATTACH_FILENAME));
        let display_name = non_empty(view.string(tags::DISPLAY_NAME));
        let name = long_filename
            .as_ref()
            .or(filename.as_ref())
            .or(display_name.as_ref())
            .map_or_else(|| Self::FALLBACK_NAME.to_string(), Clone::clone);

        Self {
            name,
            method: view
                .i32(tags::ATTACH_METHOD)
                .map_or(AttachmentMethod::None, AttachmentMethod::from_code),
            size: view.u32(tags::ATTACH_SIZE),
            filename,
            long_filename,
            extension: non_empty(view.string(tags::ATTACH_EXTENSION)),
            mime_type: non_empty(view.string(tags::ATTACH_MIME_TAG)),
            content_id: non_empty(view.string(tags::ATTACH_CONTENT_ID)),
            display_name,
            pathname: non_empty(view.string(tags::ATTACH_PATHNAME)),
            long_pathname: non_empty(view.string(tags::ATTACH_LONG_PATHNAME)),
            content_location: non_empty(view.string(tags::ATTACH_CONTENT_LOCATION)),
            mime_sequence: view.i32(tags::ATTACH_MIME_SEQUENCE),
            rendering_position: view.i32(tags::RENDERING_POSITION),
            flags: AttachmentFlags(view.u32(tags::ATTACH_FLAGS).unwrap_or(0)),
            creation_time: view.time(tags::CREATION_TIME),
            ltp_row_id: view.u32(tags::LTP_ROW_ID),
            ltp_row_version: view.u32(tags::LTP_ROW_VERSION),
            data: view.binary(tags::ATTACH_DATA).map(<[u8]>::to_vec),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Rename `name` until it is not in `seen`: `name`, `name (1)`, ...
fn unique_name(seen: &mut HashSet<String>, name: &str) -> String {
    let mut candidate = name.to_string();
    let mut n = 0;
    while seen.contains(&candidate) {
        n += 1;
        candidate = format!("{name} ({n})");
    }
    seen.insert(candidate.clone());
    candidate
}

/// Attachments of one message.
#[derive(Debug, Default)]
pub struct Attachments {
    /// Decoded attachments, by sub-node NID.
    pub items: Vec<(Nid, Attachment)>,
    /// Attachment sub-nodes that failed to decode.
    pub failures: Vec<NodeFailure>,
}

/// `PidTagRecipientType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientType {
    To,
    Cc,
    Bcc,
}

impl RecipientType {
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::To),
            2 => Some(Self::Cc),
            3 => Some(Self::Bcc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub display_name: Option<String>,
    pub email_address: Option<String>,
    pub address_type: Option<String>,
    pub recipient_type: RecipientType,
}

impl Recipient {
    /// Map a recipient table row. Rows without a To/Cc/Bcc type are not
    /// recipients and give `None`.
    pub fn from_row(row: &impl PropertyView) -> Option<Self> {
        let recipient_type = RecipientType::from_code(row.i32(tags::RECIPIENT_TYPE)?)?;
        Some(Self {
            display_name: non_empty(row.string(tags::DISPLAY_NAME)),
            email_address: non_empty(row.string(tags::SMTP_ADDRESS))
                .or_else(|| non_empty(row.string(tags::EMAIL_ADDRESS))),
            address_type: non_empty(row.string(tags::ADDRESS_TYPE)),
            recipient_type,
        })
    }
}

/// Recipients of one message, grouped by type.
#[derive(Debug, Default)]
pub struct Recipients {
    pub to: Vec<Recipient>,
    pub cc: Vec<Recipient>,
    pub bcc: Vec<Recipient>,
    /// Rows that could not be read.
    pub failures: Vec<NodeFailure>,
}

impl Recipients {
    #[must_use]
    pub fn len(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: ReadRange + 'static> Pst<S> {
    /// Decode every attachment sub-node of `message`.
    ///
    /// A failing attachment is recorded in `failures` and the others are
    /// still returned. Names are made unique within this call.
    ///
    /// # Errors
    ///
    /// Fails when the message itself or its sub-node tree cannot be read.
    pub fn attachments(&self, message: Nid) -> Result<Attachments, Error> {
        let parent = self.node(message)?;
        let sub_nodes = self.sub_nodes_of(&parent)?;
        let mut result = Attachments::default();
        let mut seen = HashSet::new();

        for (nid, entry) in sub_nodes.iter() {
            if nid.node_type() != NodeType::Attachment {
                continue;
            }
            let node = NodeRef::sub_node(message, *nid, *entry);
            match self.properties_of(&node) {
                Ok(pc) => {
                    let mut attachment = Attachment::from_view(pc.as_ref());
                    attachment.name = unique_name(&mut seen, &attachment.name);
                    result.items.push((*nid, attachment));
                }
                Err(error) => {
                    tracing::warn!("message {message}: attachment {nid} skipped: {error}");
                    result.failures.push(NodeFailure::new(*nid, error));
                }
            }
        }
        Ok(result)
    }

    /// Attachment summaries from the message's attachment table.
    ///
    /// Each row id is the NID of the attachment's sub-node. Empty when the
    /// message has no attachment table.
    pub fn attachment_headers(&self, message: Nid) -> Result<Vec<(Nid, Attachment)>, Error> {
        let parent = self.node(message)?;
        if !self.sub_nodes_of(&parent)?.contains_key(&Nid::ATTACHMENT_TABLE) {
            return Ok(Vec::new());
        }
        let table = self.table_of(&self.sub_node(&parent, Nid::ATTACHMENT_TABLE)?)?;
        table
            .rows()
            .map(|row| row.map(|row| (Nid(row.row_id), Attachment::from_view(&row))))
            .collect()
    }

    /// Decode the message embedded in attachment `attachment` of `message`.
    ///
    /// # Errors
    ///
    /// `CorruptStructure` when the attachment's data is not an embedded
    /// object, `InvalidHandle` when the object's sub-node is missing.
    pub fn embedded_message(&self, message: Nid, attachment: Nid) -> Result<PropertyContext, Error> {
        let parent = self.node(message)?;
        let node = self.sub_node(&parent, attachment)?;
        let pc = self.properties_of(&node)?;
        pc.embedded_object(self.ndb(), tags::ATTACH_DATA)
    }

    /// Read the recipient table of `message`.
    ///
    /// Rows with an unknown recipient type are ignored; unreadable rows are
    /// recorded in `failures`, attributed to the recipient table.
    pub fn recipients(&self, message: Nid) -> Result<Recipients, Error> {
        let parent = self.node(message)?;
        let mut result = Recipients::default();
        if !self.sub_nodes_of(&parent)?.contains_key(&Nid::RECIPIENT_TABLE) {
            return Ok(result);
        }
        let table = self.table_of(&self.sub_node(&parent, Nid::RECIPIENT_TABLE)?)?;

        for row in table.rows() {
            let row = match row {
                Ok(row) => row,
                Err(error) => {
                    result.failures.push(NodeFailure::new(Nid::RECIPIENT_TABLE, error));
                    continue;
                }
            };
            let Some(recipient) = Recipient::from_row(&row) else {
                tracing::debug!("message {message}: row {} is not a recipient", row.row_id);
                continue;
            };
            match recipient.recipient_type {
                RecipientType::To => result.to.push(recipient),
                RecipientType::Cc => result.cc.push(recipient),
                RecipientType::Bcc => result.bcc.push(recipient),
            }
        }
        Ok(result)
    }
}
