//! Typed `files.list` search queries.
//!
//! Drive's `q` parameter is a small boolean language over file fields. Only
//! the terms the adapter needs are modelled; [`Query`] renders itself into
//! that language through [`Display`](std::fmt::Display), quoting and escaping
//! every literal.

use std::fmt;

use crate::models::FOLDER_MIME_TYPE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Trashed(bool),
    NameEquals(String),
    /// `'<id>' in parents`
    InParents(String),
    MimeTypeEquals(String),
    MimeTypeNotEquals(String),
    And(Vec<Query>),
    Or(Vec<Query>),
}

impl Query {
    /// Non-trashed children of a folder.
    pub fn children_of(parent_id: impl Into<String>) -> Self {
        Self::And(vec![Self::Trashed(false), Self::InParents(parent_id.into())])
    }

    /// Non-trashed child of a folder with an exact name.
    pub fn named_child(parent_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::And(vec![
            Self::Trashed(false),
            Self::NameEquals(name.into()),
            Self::InParents(parent_id.into()),
        ])
    }

    /// Non-trashed sub-folders of a folder.
    pub fn folders_in(parent_id: impl Into<String>) -> Self {
        Self::And(vec![
            Self::Trashed(false),
            Self::MimeTypeEquals(FOLDER_MIME_TYPE.to_string()),
            Self::InParents(parent_id.into()),
        ])
    }

    pub fn and(self, other: Query) -> Self {
        match self {
            Self::And(mut terms) => {
                terms.push(other);
                Self::And(terms)
            },
            term => Self::And(vec![term, other]),
        }
    }

    fn fmt_group(terms: &[Query], joiner: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, term) in terms.iter().enumerate() {
            if index > 0 {
                write!(f, " {joiner} ")?;
            }
            match term {
                Self::And(inner) | Self::Or(inner) if inner.len() > 1 => write!(f, "({term})")?,
                _ => write!(f, "{term}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trashed(trashed) => write!(f, "trashed = {trashed}"),
            Self::NameEquals(name) => write!(f, "name = '{}'", escape(name)),
            Self::InParents(id) => write!(f, "'{}' in parents", escape(id)),
            Self::MimeTypeEquals(mime) => write!(f, "mimeType = '{}'", escape(mime)),
            Self::MimeTypeNotEquals(mime) => write!(f, "mimeType != '{}'", escape(mime)),
            Self::And(terms) => Self::fmt_group(terms, "and", f),
            Self::Or(terms) => Self::fmt_group(terms, "or", f),
        }
    }
}

/// Escape a string literal for use inside single quotes.
pub fn escape(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '\\' | '\'') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A `files.list` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub query: Option<Query>,
    pub page_size: Option<u32>,
    pub page_token: Option<String>,
    /// Field mask for the whole response, e.g. `files(id,name),nextPageToken`.
    pub fields: Option<String>,
    pub spaces: Option<String>,
    pub order_by: Option<String>,
}

impl ListRequest {
    pub fn new(query: Query) -> Self {
        Self {
            query: Some(query),
            ..Default::default()
        }
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn page_token(mut self, token: Option<String>) -> Self {
        self.page_token = token;
        self
    }

    pub fn fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    pub fn spaces(mut self, spaces: impl Into<String>) -> Self {
        self.spaces = Some(spaces.into());
        self
    }

    pub fn order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }
}
