//! Instruction files.
//!
//! A package that needs root-only filesystem tweaks in the final image
//! (device nodes, ownership, modes) records them in a small XML file;
//! image-building deployments read the instructions back and apply them
//! to their virtual tree before writing the archive.
//!
//! ```xml
//! <instructions>
//!   <chmod mode="0644"><filespec><root>/etc</root><spec>*.conf</spec></filespec></chmod>
//!   <chown user="root" group="root"><filespec><root>/</root><spec>bin</spec><recurse>true</recurse></filespec></chown>
//!   <mknod type="char" major="5" minor="1" mode="0600" uid="0" gid="0">
//!     <filename>/dev/console</filename>
//!   </mknod>
//! </instructions>
//! ```

use std::fmt::Write as _;
use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstrError {
    #[error("instruction file is malformed: {0}")]
    BadFormat(String),

    #[error("bad glob '{spec}': {source}")]
    BadGlob {
        spec: String,
        #[source]
        source: globset::Error,
    },

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
}

/// A glob with a base directory, applied over a virtual tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSpec {
    /// Absolute base within the virtual tree.
    pub root: String,
    /// Glob relative to `root`.
    pub spec: String,
    /// Whether matching directories apply to everything beneath them.
    pub recurse: bool,
}

impl FileSpec {
    pub fn new(root: &str, spec: &str, recurse: bool) -> Self {
        FileSpec {
            root: root.to_string(),
            spec: spec.to_string(),
            recurse,
        }
    }

    fn glob_set(&self) -> Result<GlobSet, InstrError> {
        let mut builder = GlobSetBuilder::new();
        let mut add = |pattern: &str| -> Result<(), InstrError> {
            // `*` must not cross directory boundaries; `**` still does.
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|source| InstrError::BadGlob {
                    spec: pattern.to_string(),
                    source,
                })?;
            builder.add(glob);
            Ok(())
        };
        add(&self.spec)?;
        if self.recurse {
            add(&format!("{}/**", self.spec))?;
        }
        Ok(builder.build().map_err(|source| InstrError::BadGlob {
            spec: self.spec.clone(),
            source,
        })?)
    }

    /// Which of `paths` (absolute, '/'-separated virtual paths) this
    /// filespec selects.
    pub fn select<'a>(&self, paths: &[&'a str]) -> Result<Vec<&'a str>, InstrError> {
        let globs = self.glob_set()?;
        let root = self.root.trim_end_matches('/');
        let mut selected = Vec::new();
        for path in paths {
            let Some(rel) = path.strip_prefix(root) else {
                continue;
            };
            let rel = rel.trim_start_matches('/');
            if rel.is_empty() {
                continue;
            }
            if globs.is_match(Path::new(rel)) {
                selected.push(*path);
            }
        }
        Ok(selected)
    }
}

/// One instruction from an instruction file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Chmod {
        mode: String,
        filespec: FileSpec,
    },
    Chown {
        user: String,
        group: String,
        filespec: FileSpec,
    },
    Mknod {
        node_type: NodeType,
        major: u32,
        minor: u32,
        mode: String,
        uid: u32,
        gid: u32,
        filename: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Char,
    Block,
}

impl NodeType {
    fn as_str(&self) -> &'static str {
        match self {
            NodeType::Char => "char",
            NodeType::Block => "block",
        }
    }

    fn parse(s: &str) -> Result<Self, InstrError> {
        match s {
            "char" => Ok(NodeType::Char),
            "block" => Ok(NodeType::Block),
            other => Err(InstrError::BadFormat(format!(
                "mknod type must be 'char' or 'block', not '{other}'"
            ))),
        }
    }
}

/// Parse the contents of an instruction file.
pub fn parse(xml: &str) -> Result<Vec<Instruction>, InstrError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut instructions = Vec::new();
    let mut buf = Vec::new();
    let mut seen_root = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(ref e) if e.name().as_ref() == b"instructions" => {
                seen_root = true;
            }
            Event::Start(ref e) if e.name().as_ref() == b"chmod" => {
                let mode = required_attr(e, "mode")?;
                let filespec = read_filespec(&mut reader)?;
                read_to_end_of(&mut reader, "chmod")?;
                instructions.push(Instruction::Chmod { mode, filespec });
            }
            Event::Start(ref e) if e.name().as_ref() == b"chown" => {
                let user = required_attr(e, "user")?;
                let group = required_attr(e, "group")?;
                let filespec = read_filespec(&mut reader)?;
                read_to_end_of(&mut reader, "chown")?;
                instructions.push(Instruction::Chown {
                    user,
                    group,
                    filespec,
                });
            }
            Event::Start(ref e) if e.name().as_ref() == b"mknod" => {
                let node_type = NodeType::parse(&required_attr(e, "type")?)?;
                let major = numeric_attr(e, "major")?;
                let minor = numeric_attr(e, "minor")?;
                let mode = required_attr(e, "mode")?;
                let uid = numeric_attr(e, "uid")?;
                let gid = numeric_attr(e, "gid")?;
                let filename = read_named_text(&mut reader, "filename")?;
                read_to_end_of(&mut reader, "mknod")?;
                instructions.push(Instruction::Mknod {
                    node_type,
                    major,
                    minor,
                    mode,
                    uid,
                    gid,
                    filename,
                });
            }
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(InstrError::BadFormat(
            "missing <instructions> root element".to_string(),
        ));
    }
    Ok(instructions)
}

/// Render instructions back to the file format.
pub fn render(instructions: &[Instruction]) -> String {
    let mut out = String::from("<instructions>\n");
    for instruction in instructions {
        match instruction {
            Instruction::Chmod { mode, filespec } => {
                let _ = writeln!(out, "  <chmod mode=\"{mode}\">");
                render_filespec(&mut out, filespec);
                let _ = writeln!(out, "  </chmod>");
            }
            Instruction::Chown {
                user,
                group,
                filespec,
            } => {
                let _ = writeln!(out, "  <chown user=\"{user}\" group=\"{group}\">");
                render_filespec(&mut out, filespec);
                let _ = writeln!(out, "  </chown>");
            }
            Instruction::Mknod {
                node_type,
                major,
                minor,
                mode,
                uid,
                gid,
                filename,
            } => {
                let _ = writeln!(
                    out,
                    "  <mknod type=\"{}\" major=\"{major}\" minor=\"{minor}\" mode=\"{mode}\" uid=\"{uid}\" gid=\"{gid}\">",
                    node_type.as_str()
                );
                let _ = writeln!(out, "    <filename>{filename}</filename>");
                let _ = writeln!(out, "  </mknod>");
            }
        }
    }
    out.push_str("</instructions>\n");
    out
}

fn render_filespec(out: &mut String, filespec: &FileSpec) {
    let _ = writeln!(out, "    <filespec>");
    let _ = writeln!(out, "      <root>{}</root>", filespec.root);
    let _ = writeln!(out, "      <spec>{}</spec>", filespec.spec);
    if filespec.recurse {
        let _ = writeln!(out, "      <recurse>true</recurse>");
    }
    let _ = writeln!(out, "    </filespec>");
}

fn required_attr(e: &quick_xml::events::BytesStart, name: &str) -> Result<String, InstrError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| InstrError::BadFormat(e.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(attr
                .unescape_value()
                .map_err(|e| InstrError::BadFormat(e.to_string()))?
                .into_owned());
        }
    }
    Err(InstrError::BadFormat(format!(
        "missing '{name}' attribute on <{}>",
        String::from_utf8_lossy(e.name().as_ref())
    )))
}

fn numeric_attr(e: &quick_xml::events::BytesStart, name: &str) -> Result<u32, InstrError> {
    let value = required_attr(e, name)?;
    value
        .parse()
        .map_err(|_| InstrError::BadFormat(format!("'{name}' must be numeric, not '{value}'")))
}

/// Read a `<filespec>` element: `<root>`, `<spec>`, optional `<recurse>`.
fn read_filespec(reader: &mut Reader<&[u8]>) -> Result<FileSpec, InstrError> {
    let mut root = None;
    let mut spec = None;
    let mut recurse = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) if e.name().as_ref() == b"filespec" => {}
            Event::Start(ref e) if e.name().as_ref() == b"root" => {
                root = Some(read_text(reader, "root")?);
            }
            Event::Start(ref e) if e.name().as_ref() == b"spec" => {
                spec = Some(read_text(reader, "spec")?);
            }
            Event::Start(ref e) if e.name().as_ref() == b"recurse" => {
                recurse = read_text(reader, "recurse")? == "true";
            }
            Event::End(ref e) if e.name().as_ref() == b"filespec" => break,
            Event::Eof => {
                return Err(InstrError::BadFormat(
                    "unterminated <filespec>".to_string(),
                ))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(FileSpec {
        root: root.ok_or_else(|| InstrError::BadFormat("filespec needs a <root>".to_string()))?,
        spec: spec.ok_or_else(|| InstrError::BadFormat("filespec needs a <spec>".to_string()))?,
        recurse,
    })
}

fn read_named_text(reader: &mut Reader<&[u8]>, name: &str) -> Result<String, InstrError> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) if e.name().as_ref() == name.as_bytes() => {
                return read_text(reader, name);
            }
            Event::Eof => {
                return Err(InstrError::BadFormat(format!("missing <{name}> element")))
            }
            _ => {}
        }
        buf.clear();
    }
}

/// The text content up to the matching end tag of `name`.
fn read_text(reader: &mut Reader<&[u8]>, name: &str) -> Result<String, InstrError> {
    let mut text = String::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(t) => {
                let raw = String::from_utf8_lossy(t.as_ref());
                let unescaped = quick_xml::escape::unescape(&raw)
                    .map_err(|e| InstrError::BadFormat(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Event::End(ref e) if e.name().as_ref() == name.as_bytes() => {
                return Ok(text.trim().to_string());
            }
            Event::Eof => {
                return Err(InstrError::BadFormat(format!("unterminated <{name}>")))
            }
            _ => {}
        }
        buf.clear();
    }
}

/// Skip everything up to the end tag of `name`.
fn read_to_end_of(reader: &mut Reader<&[u8]>, name: &str) -> Result<(), InstrError> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::End(ref e) if e.name().as_ref() == name.as_bytes() => return Ok(()),
            Event::Eof => return Ok(()),
            _ => {}
        }
        buf.clear();
    }
}
