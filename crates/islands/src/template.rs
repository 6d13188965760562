use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use sha2::{Digest, Sha256};

use crate::location::BlockPos;
use crate::world::{Dimension, WorldId};

pub const TEMPLATE_DIR: &str = "schems";
pub const TEMPLATE_EXTENSION: &str = "schem";

const ROOT_ELEMENT: &str = "Template";
const BLOCK_ELEMENT: &str = "Block";
const BLOCK_ATTRIBUTES: [&str; 4] = ["x", "y", "z", "type"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateName {
    Island,
    NetherIsland,
    EndIsland,
}

impl TemplateName {
    pub fn for_dimension(dimension: Dimension) -> Self {
        match dimension {
            Dimension::Overworld => Self::Island,
            Dimension::Nether => Self::NetherIsland,
            Dimension::End => Self::EndIsland,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Island => "island",
            Self::NetherIsland => "nether-island",
            Self::EndIsland => "end-island",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.{TEMPLATE_EXTENSION}", self.as_str())
    }

    /// Path of the bundled default, relative to a resource bundle root.
    pub fn bundled_resource(self) -> String {
        format!("{TEMPLATE_DIR}/{}", self.file_name())
    }
}

impl fmt::Display for TemplateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateBlock {
    /// Position relative to the island anchor.
    pub offset: BlockPos,
    pub kind: String,
}

/// A loaded structural snapshot. Immutable once parsed; a reload builds a
/// new one.
#[derive(Debug, Clone)]
pub struct Template {
    world: WorldId,
    name: TemplateName,
    source_path: PathBuf,
    fingerprint_sha256_hex: String,
    blocks: Vec<TemplateBlock>,
}

impl Template {
    pub fn world(&self) -> &WorldId {
        &self.world
    }

    pub fn name(&self) -> TemplateName {
        self.name
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint_sha256_hex
    }

    pub fn blocks(&self) -> &[TemplateBlock] {
        &self.blocks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateErrorCode {
    XmlMalformed,
    InvalidRoot,
    NameMismatch,
    UnknownElement,
    UnknownAttribute,
    MissingAttribute,
    InvalidValue,
    DuplicateBlock,
    Empty,
}

#[derive(Debug, Clone)]
pub struct TemplateParseError {
    pub code: TemplateErrorCode,
    pub message: String,
    pub file_path: PathBuf,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for TemplateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (file={}, line={}, column={})",
                self.code,
                self.message,
                self.file_path.display(),
                loc.line,
                loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (file={})",
                self.code,
                self.message,
                self.file_path.display()
            ),
        }
    }
}

impl std::error::Error for TemplateParseError {}

pub fn parse_template(
    world: &WorldId,
    name: TemplateName,
    file_path: &Path,
    raw: &str,
) -> Result<Template, TemplateParseError> {
    let doc = Document::parse(raw).map_err(|error| TemplateParseError {
        code: TemplateErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != ROOT_ELEMENT {
        return Err(error_at_node(
            TemplateErrorCode::InvalidRoot,
            format!("root element must be <{ROOT_ELEMENT}>"),
            file_path,
            &doc,
            root,
        ));
    }
    if let Some(declared) = root.attribute("name") {
        if declared != name.as_str() {
            return Err(error_at_node(
                TemplateErrorCode::NameMismatch,
                format!("template declares name '{declared}' but was loaded as '{name}'"),
                file_path,
                &doc,
                root,
            ));
        }
    }

    let mut seen_offsets = HashSet::<BlockPos>::new();
    let mut blocks = Vec::<TemplateBlock>::new();
    for child in root.children().filter(|node| node.is_element()) {
        if child.tag_name().name() != BLOCK_ELEMENT {
            return Err(error_at_node(
                TemplateErrorCode::UnknownElement,
                format!(
                    "unsupported element <{}>; templates contain only <{BLOCK_ELEMENT}>",
                    child.tag_name().name()
                ),
                file_path,
                &doc,
                child,
            ));
        }
        let block = parse_block(file_path, &doc, child)?;
        if !seen_offsets.insert(block.offset) {
            return Err(error_at_node(
                TemplateErrorCode::DuplicateBlock,
                format!("two blocks share offset {}", block.offset.xyz()),
                file_path,
                &doc,
                child,
            ));
        }
        blocks.push(block);
    }

    if blocks.is_empty() {
        return Err(error_at_node(
            TemplateErrorCode::Empty,
            "template has no blocks".to_string(),
            file_path,
            &doc,
            root,
        ));
    }

    Ok(Template {
        world: world.clone(),
        name,
        source_path: file_path.to_path_buf(),
        fingerprint_sha256_hex: sha256_hex(raw.as_bytes()),
        blocks,
    })
}

fn parse_block(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<TemplateBlock, TemplateParseError> {
    for attribute in node.attributes() {
        if !BLOCK_ATTRIBUTES.contains(&attribute.name()) {
            return Err(error_at_node(
                TemplateErrorCode::UnknownAttribute,
                format!("unknown attribute '{}' on <{BLOCK_ELEMENT}>", attribute.name()),
                file_path,
                doc,
                node,
            ));
        }
    }

    let coordinate = |axis: &str| -> Result<i32, TemplateParseError> {
        let raw = required_attribute(file_path, doc, node, axis)?;
        raw.trim().parse::<i32>().map_err(|_| {
            error_at_node(
                TemplateErrorCode::InvalidValue,
                format!("attribute '{axis}' must be an integer, got '{raw}'"),
                file_path,
                doc,
                node,
            )
        })
    };
    let offset = BlockPos::new(coordinate("x")?, coordinate("y")?, coordinate("z")?);

    let kind = required_attribute(file_path, doc, node, "type")?.trim();
    if kind.is_empty() {
        return Err(error_at_node(
            TemplateErrorCode::InvalidValue,
            "attribute 'type' cannot be empty".to_string(),
            file_path,
            doc,
            node,
        ));
    }

    Ok(TemplateBlock {
        offset,
        kind: kind.to_string(),
    })
}

fn required_attribute<'a>(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'a, '_>,
    name: &str,
) -> Result<&'a str, TemplateParseError> {
    node.attribute(name).ok_or_else(|| {
        error_at_node(
            TemplateErrorCode::MissingAttribute,
            format!("<{BLOCK_ELEMENT}> is missing attribute '{name}'"),
            file_path,
            doc,
            node,
        )
    })
}

fn error_at_node(
    code: TemplateErrorCode,
    message: String,
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> TemplateParseError {
    let pos = doc.text_pos_at(node.range().start);
    TemplateParseError {
        code,
        message,
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: pos.row as usize,
            column: pos.col as usize,
        }),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    let digest = Sha256::digest(bytes);
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}
