//! Finding report documents inside an email.
//!
//! Reporters attach the XML document plain, gzipped or zipped, and some
//! label every attachment `application/octet-stream`; for those the file
//! extension decides.

use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use mail_parser::{Message, MessageParser, MimeHeaders};
use tracing::debug;

use super::model::Feedback;
use crate::{Error, Result};

/// How a report payload is packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packaging {
    /// Plain XML.
    Xml,
    /// A gzipped XML document.
    Gzip,
    /// A zip archive with one or more XML documents.
    Zip,
}

impl Packaging {
    /// Packaging for a declared MIME type, with the attachment name as a
    /// fallback for `application/octet-stream`.
    #[must_use]
    pub fn detect(mime_type: &str, filename: Option<&str>) -> Option<Self> {
        match mime_type.to_ascii_lowercase().as_str() {
            "text/xml" | "application/xml" => Some(Self::Xml),
            "application/gzip" | "application/x-gzip" => Some(Self::Gzip),
            "application/zip" | "application/x-zip-compressed" => Some(Self::Zip),
            "application/octet-stream" => Self::from_extension(filename?),
            _ => None,
        }
    }

    fn from_extension(filename: &str) -> Option<Self> {
        let (_, extension) = filename.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "xml" => Some(Self::Xml),
            "gz" => Some(Self::Gzip),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }

    /// Unpacks a payload into XML documents.
    pub fn unpack(self, data: &[u8]) -> Result<Vec<String>> {
        match self {
            Self::Xml => Ok(vec![String::from_utf8_lossy(data).into_owned()]),
            Self::Gzip => {
                let mut xml = String::new();
                GzDecoder::new(data).read_to_string(&mut xml)?;
                Ok(vec![xml])
            }
            Self::Zip => {
                let mut archive = zip::ZipArchive::new(Cursor::new(data))?;
                let mut documents = Vec::with_capacity(archive.len());
                for i in 0..archive.len() {
                    let mut file = archive.by_index(i)?;
                    if file.is_dir() {
                        continue;
                    }
                    let mut xml = String::new();
                    file.read_to_string(&mut xml)?;
                    documents.push(xml);
                }
                Ok(documents)
            }
        }
    }
}

/// Extracts every aggregate report from a raw RFC 822 message.
///
/// Fails with [`Error::Extraction`] if no part of the message looks like a
/// report, and with a decoding error if a part does but is broken.
pub fn extract_reports(raw: &[u8]) -> Result<Vec<Feedback>> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| extraction_error(None))?;

    let mut found = false;
    let mut reports = Vec::new();

    for part in &message.parts {
        let Some(content_type) = part.content_type() else {
            continue;
        };
        let mime_type = match content_type.subtype() {
            Some(subtype) => format!("{}/{subtype}", content_type.ctype()),
            None => content_type.ctype().to_string(),
        };
        let Some(packaging) = Packaging::detect(&mime_type, part.attachment_name()) else {
            continue;
        };

        debug!(%mime_type, ?packaging, "found report attachment");
        found = true;
        for xml in packaging.unpack(part.contents())? {
            reports.push(Feedback::from_xml(&xml)?);
        }
    }

    if found {
        Ok(reports)
    } else {
        Err(extraction_error(Some(&message)))
    }
}

fn extraction_error(message: Option<&Message<'_>>) -> Error {
    let from_email = message
        .and_then(|m| m.from())
        .and_then(|address| address.first())
        .and_then(|addr| addr.address())
        .map(ToString::to_string);
    let subject = message
        .and_then(|m| m.subject())
        .unwrap_or("<no subject>")
        .to_string();

    Error::Extraction {
        from: from_email
            .clone()
            .unwrap_or_else(|| "<from missing>".to_string()),
        subject,
        from_email,
    }
}
