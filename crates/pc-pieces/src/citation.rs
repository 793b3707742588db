//! Citations and Manifests
//!
//! Text handed to the document editor: a short citation for one piece and the
//! full ordered list of pieces (the bordereau).
//!
//! Citations are point-in-time. They carry the piece's number at the moment of
//! insertion and are not rewritten when the collection is later reordered.

use pc_core::CitationStyle;
use tracing::{debug, instrument};

use crate::collection::PieceCollection;
use crate::error::{PieceError, PieceResult};
use crate::model::Piece;

/// The external editor that receives inserted text at its cursor
pub trait DocumentEditor: Send + Sync {
    fn insert_text(&self, text: &str);
}

fn label(style: CitationStyle, numero: u32) -> String {
    match style {
        CitationStyle::English => format!("Exhibit no. {}", numero),
        CitationStyle::French => format!("Pièce n°{}", numero),
    }
}

fn heading(style: CitationStyle) -> &'static str {
    match style {
        CitationStyle::English => "LIST OF EXHIBITS",
        CitationStyle::French => "BORDEREAU DE PIÈCES",
    }
}

/// Citation for a piece at its current number
pub fn citation_for(piece: &Piece, style: CitationStyle) -> String {
    match style {
        CitationStyle::English => format!("(see {})", label(style, piece.numero)),
        CitationStyle::French => format!("(voir {})", label(style, piece.numero)),
    }
}

/// One line of a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub numero: u32,
    pub name: String,
    pub description: Option<String>,
}

impl ManifestEntry {
    fn from_piece(piece: &Piece) -> Self {
        Self {
            numero: piece.numero,
            name: piece.name.clone(),
            description: piece.description().map(str::to_string),
        }
    }

    fn to_text(&self, style: CitationStyle) -> String {
        let (sep, desc_sep) = match style {
            CitationStyle::English => (":", " — "),
            CitationStyle::French => (" :", " - "),
        };
        let mut line = format!("{}{} {}", label(style, self.numero), sep, self.name);
        if let Some(description) = &self.description {
            line.push_str(desc_sep);
            line.push_str(description);
        }
        line
    }

    fn to_html(&self, style: CitationStyle) -> String {
        let (sep, desc_sep) = match style {
            CitationStyle::English => (":", " — "),
            CitationStyle::French => (" :", " - "),
        };
        let mut item = format!(
            "<li><strong>{}</strong>{} {}",
            escape_html(&label(style, self.numero)),
            sep,
            escape_html(&self.name)
        );
        if let Some(description) = &self.description {
            item.push_str(desc_sep);
            item.push_str(&escape_html(description));
        }
        item.push_str("</li>");
        item
    }
}

/// Ordered enumeration of every piece, or nothing at all
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    /// No pieces; must not be inserted
    Empty,
    Entries {
        style: CitationStyle,
        entries: Vec<ManifestEntry>,
    },
}

impl Manifest {
    /// Build the manifest in collection order
    pub fn render(collection: &PieceCollection, style: CitationStyle) -> Self {
        if collection.is_empty() {
            return Manifest::Empty;
        }
        Manifest::Entries {
            style,
            entries: collection.iter().map(ManifestEntry::from_piece).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Manifest::Empty)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        match self {
            Manifest::Empty => &[],
            Manifest::Entries { entries, .. } => entries,
        }
    }

    /// Plain text, one entry per line under a heading
    pub fn to_text(&self) -> Option<String> {
        let Manifest::Entries { style, entries } = self else {
            return None;
        };
        let mut text = String::from(heading(*style));
        for entry in entries {
            text.push('\n');
            text.push_str(&entry.to_text(*style));
        }
        Some(text)
    }

    /// Heading plus an unordered list, for rich-text editors
    pub fn to_html(&self) -> Option<String> {
        let Manifest::Entries { style, entries } = self else {
            return None;
        };
        let mut html = format!("<h2>{}</h2><ul>", escape_html(heading(*style)));
        for entry in entries {
            html.push_str(&entry.to_html(*style));
        }
        html.push_str("</ul>");
        Some(html)
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Output format for inserted manifests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifestFormat {
    #[default]
    Text,
    Html,
}

/// Inserts citations and manifests into a document editor
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceInserter {
    style: CitationStyle,
}

impl ReferenceInserter {
    pub fn new(style: CitationStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> CitationStyle {
        self.style
    }

    pub fn token_for(&self, piece: &Piece) -> String {
        citation_for(piece, self.style)
    }

    /// Insert a citation for `piece` and return the inserted text
    #[instrument(skip(self, editor, piece), fields(id = %piece.id, numero = piece.numero))]
    pub fn insert_reference(&self, editor: &dyn DocumentEditor, piece: &Piece) -> String {
        let token = self.token_for(piece);
        editor.insert_text(&token);
        debug!(%token, "Reference inserted");
        token
    }

    /// Insert the manifest for `collection`. An empty collection inserts nothing.
    #[instrument(skip(self, editor, collection), fields(count = collection.len()))]
    pub fn insert_manifest(
        &self,
        editor: &dyn DocumentEditor,
        collection: &PieceCollection,
        format: ManifestFormat,
    ) -> PieceResult<Manifest> {
        let manifest = Manifest::render(collection, self.style);
        let text = match format {
            ManifestFormat::Text => manifest.to_text(),
            ManifestFormat::Html => manifest.to_html(),
        }
        .ok_or(PieceError::EmptyManifest)?;

        editor.insert_text(&text);
        debug!(entries = manifest.entries().len(), "Manifest inserted");
        Ok(manifest)
    }
}
