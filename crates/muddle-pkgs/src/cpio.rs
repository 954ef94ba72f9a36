//! CPIO deployments: pack role install trees into a cpio archive (the
//! usual shape of a Linux initramfs), applying the packages' instruction
//! files on the way.
//!
//! Archive writing itself sits behind the narrow [`CpioWriter`] trait;
//! [`NewcCpioWriter`] is the bundled implementation, emitting the `newc`
//! format `cpio -H newc` and kernels understand.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use log::info;
use muddle_core::{
    env::MUDDLE_TARGET_LOCATION,
    rules::Rule,
    tag, workspace, Action, BuildContext, Label, MuddleError, Result, RuleSet, WILDCARD,
};
use muddle_instr::{FileSpec, Instruction, NodeType};
use walkdir::WalkDir;

/// One entry in the virtual tree an archive is built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VirtualEntry {
    Dir {
        mode: u32,
        uid: u32,
        gid: u32,
    },
    File {
        src: PathBuf,
        mode: u32,
        uid: u32,
        gid: u32,
    },
    Symlink {
        target: String,
    },
    Node {
        kind: NodeType,
        major: u32,
        minor: u32,
        mode: u32,
        uid: u32,
        gid: u32,
    },
}

/// The virtual filesystem assembled from the install trees, keyed by
/// absolute target path ('/'-separated).
#[derive(Clone, Debug, Default)]
pub struct VirtualTree {
    entries: BTreeMap<String, VirtualEntry>,
}

impl VirtualTree {
    pub fn new() -> Self {
        VirtualTree::default()
    }

    /// Mirror `dir` into the tree at `base` (an absolute target path).
    pub fn merge_from_fs(&mut self, dir: &Path, base: &str) -> Result<()> {
        let base = base.trim_end_matches('/');
        for entry in WalkDir::new(dir).min_depth(1) {
            let entry =
                entry.map_err(|e| MuddleError::GiveUp(format!("walking {}: {e}", dir.display())))?;
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| MuddleError::Bug(format!("walkdir escaped its root: {e}")))?;
            let target = format!("{base}/{}", rel.to_string_lossy().replace('\\', "/"));

            let file_type = entry.file_type();
            let virtual_entry = if file_type.is_dir() {
                VirtualEntry::Dir {
                    mode: 0o755,
                    uid: 0,
                    gid: 0,
                }
            } else if file_type.is_symlink() {
                let link = fs::read_link(entry.path())
                    .map_err(|e| MuddleError::io(entry.path(), e))?;
                VirtualEntry::Symlink {
                    target: link.to_string_lossy().into_owned(),
                }
            } else {
                VirtualEntry::File {
                    src: entry.path().to_path_buf(),
                    mode: 0o644,
                    uid: 0,
                    gid: 0,
                }
            };
            self.entries.insert(target, virtual_entry);
        }
        Ok(())
    }

    pub fn paths(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn get(&self, path: &str) -> Option<&VirtualEntry> {
        self.entries.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VirtualEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn chmod(&mut self, filespec: &FileSpec, mode: u32) -> Result<()> {
        let selected: Vec<String> = filespec
            .select(&self.paths())
            .map_err(|e| MuddleError::GiveUp(e.to_string()))?
            .into_iter()
            .map(str::to_string)
            .collect();
        for path in selected {
            if let Some(entry) = self.entries.get_mut(&path) {
                match entry {
                    VirtualEntry::Dir { mode: m, .. }
                    | VirtualEntry::File { mode: m, .. }
                    | VirtualEntry::Node { mode: m, .. } => *m = mode,
                    VirtualEntry::Symlink { .. } => {}
                }
            }
        }
        Ok(())
    }

    fn chown(&mut self, filespec: &FileSpec, uid: u32, gid: u32) -> Result<()> {
        let selected: Vec<String> = filespec
            .select(&self.paths())
            .map_err(|e| MuddleError::GiveUp(e.to_string()))?
            .into_iter()
            .map(str::to_string)
            .collect();
        for path in selected {
            if let Some(entry) = self.entries.get_mut(&path) {
                match entry {
                    VirtualEntry::Dir { uid: u, gid: g, .. }
                    | VirtualEntry::File { uid: u, gid: g, .. }
                    | VirtualEntry::Node { uid: u, gid: g, .. } => {
                        *u = uid;
                        *g = gid;
                    }
                    VirtualEntry::Symlink { .. } => {}
                }
            }
        }
        Ok(())
    }

    /// Apply one instruction to the tree.
    pub fn apply(&mut self, instruction: &Instruction) -> Result<()> {
        match instruction {
            Instruction::Chmod { mode, filespec } => {
                let mode = parse_mode(mode)?;
                self.chmod(filespec, mode)
            }
            Instruction::Chown {
                user,
                group,
                filespec,
            } => {
                let uid = parse_owner(user)?;
                let gid = parse_owner(group)?;
                self.chown(filespec, uid, gid)
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
                self.entries.insert(
                    filename.clone(),
                    VirtualEntry::Node {
                        kind: *node_type,
                        major: *major,
                        minor: *minor,
                        mode: parse_mode(mode)?,
                        uid: *uid,
                        gid: *gid,
                    },
                );
                Ok(())
            }
        }
    }
}

fn parse_mode(mode: &str) -> Result<u32> {
    u32::from_str_radix(mode, 8)
        .map_err(|_| MuddleError::GiveUp(format!("'{mode}' is not an octal mode")))
}

fn parse_owner(owner: &str) -> Result<u32> {
    if owner == "root" {
        return Ok(0);
    }
    owner.parse().map_err(|_| {
        MuddleError::GiveUp(format!(
            "cannot resolve owner '{owner}' (use a numeric id or 'root')"
        ))
    })
}

/// Writes a virtual tree out as an archive.
pub trait CpioWriter: Send + Sync {
    fn write_archive(&self, out: &Path, tree: &VirtualTree) -> Result<()>;
}

/// The `newc` (SVR4, no CRC) cpio format.
pub struct NewcCpioWriter;

impl NewcCpioWriter {
    fn header(
        out: &mut Vec<u8>,
        ino: u32,
        mode: u32,
        uid: u32,
        gid: u32,
        filesize: u32,
        rdev_major: u32,
        rdev_minor: u32,
        name: &str,
    ) {
        let namesize = name.len() as u32 + 1;
        let _ = write!(
            out,
            "070701{ino:08x}{mode:08x}{uid:08x}{gid:08x}{nlink:08x}{mtime:08x}\
             {filesize:08x}{devmajor:08x}{devminor:08x}{rdev_major:08x}{rdev_minor:08x}\
             {namesize:08x}{check:08x}",
            nlink = 1,
            mtime = 0,
            devmajor = 0,
            devminor = 0,
            check = 0,
        );
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        // Header plus name pads to a multiple of four.
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }

    fn pad_data(out: &mut Vec<u8>) {
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }
}

impl CpioWriter for NewcCpioWriter {
    fn write_archive(&self, out_path: &Path, tree: &VirtualTree) -> Result<()> {
        let mut out: Vec<u8> = Vec::new();
        let mut ino = 1u32;

        for (path, entry) in tree.iter() {
            // Archive member names are relative to the image root.
            let name = path.trim_start_matches('/');
            if name.is_empty() {
                continue;
            }
            match entry {
                VirtualEntry::Dir { mode, uid, gid } => {
                    Self::header(&mut out, ino, 0o040000 | mode, *uid, *gid, 0, 0, 0, name);
                }
                VirtualEntry::File {
                    src,
                    mode,
                    uid,
                    gid,
                } => {
                    let data = fs::read(src).map_err(|e| MuddleError::io(src, e))?;
                    Self::header(
                        &mut out,
                        ino,
                        0o100000 | mode,
                        *uid,
                        *gid,
                        data.len() as u32,
                        0,
                        0,
                        name,
                    );
                    out.extend_from_slice(&data);
                    Self::pad_data(&mut out);
                }
                VirtualEntry::Symlink { target } => {
                    Self::header(
                        &mut out,
                        ino,
                        0o120000 | 0o777,
                        0,
                        0,
                        target.len() as u32,
                        0,
                        0,
                        name,
                    );
                    out.extend_from_slice(target.as_bytes());
                    Self::pad_data(&mut out);
                }
                VirtualEntry::Node {
                    kind,
                    major,
                    minor,
                    mode,
                    uid,
                    gid,
                } => {
                    let type_bits = match kind {
                        NodeType::Char => 0o020000,
                        NodeType::Block => 0o060000,
                    };
                    Self::header(
                        &mut out,
                        ino,
                        type_bits | mode,
                        *uid,
                        *gid,
                        0,
                        *major,
                        *minor,
                        name,
                    );
                }
            }
            ino += 1;
        }
        Self::header(&mut out, 0, 0, 0, 0, 0, 0, 0, "TRAILER!!!");

        fs::write(out_path, &out).map_err(|e| MuddleError::io(out_path, e))
    }
}

/// The action behind a cpio deployment.
pub struct CpioDeployment {
    /// Roles merged into the image, each at its target base directory.
    bases: BTreeMap<String, String>,
    target_file: String,
    writer: Arc<dyn CpioWriter>,
    compression: Option<Compression>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Bzip2,
}

impl Action for CpioDeployment {
    fn name(&self) -> &str {
        "cpio-deployment"
    }

    fn build_label(
        &self,
        ctx: &BuildContext,
        label: &Label,
        _env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let deploy_dir = ctx.layout.deploy_path(label.name(), label.domain());
        match label.tag() {
            tag::DEPLOYED => {
                workspace::ensure_dir(&deploy_dir)?;
                let deploy_file = deploy_dir.join(&self.target_file);

                let mut tree = VirtualTree::new();
                for (role, base) in &self.bases {
                    let install = ctx.layout.role_install_path(role, label.domain());
                    if install.exists() {
                        tree.merge_from_fs(&install, base)?;
                    }
                }

                // Apply every matching package's instructions.
                for (role, _) in &self.bases {
                    let query = Label::package(label.domain(), WILDCARD, Some(role), WILDCARD)?;
                    for (pkg, file) in ctx.db.scan_instructions(&query)? {
                        info!("applying instructions for {pkg}");
                        let xml = fs::read_to_string(&file)
                            .map_err(|e| MuddleError::io(&file, e))?;
                        let instructions = muddle_instr::parse(&xml)
                            .map_err(|e| MuddleError::GiveUp(e.to_string()))?;
                        for instruction in &instructions {
                            tree.apply(instruction)?;
                        }
                    }
                }

                info!("writing {}", deploy_file.display());
                self.writer.write_archive(&deploy_file, &tree)?;

                if let Some(compression) = self.compression {
                    let program = match compression {
                        Compression::Gzip => "gzip",
                        Compression::Bzip2 => "bzip2",
                    };
                    let status = Command::new(program)
                        .arg("-f")
                        .arg(&deploy_file)
                        .status()
                        .map_err(|e| MuddleError::io(&deploy_file, e))?;
                    if !status.success() {
                        return Err(MuddleError::GiveUp(format!(
                            "{program} failed for {}",
                            deploy_file.display()
                        )));
                    }
                }
                Ok(())
            }
            tag::CLEAN => {
                if deploy_dir.exists() {
                    fs::remove_dir_all(&deploy_dir)
                        .map_err(|e| MuddleError::io(&deploy_dir, e))?;
                }
                Ok(())
            }
            tag::DISTRIBUTED => Ok(()),
            other => Err(MuddleError::Bug(format!(
                "cpio deployment asked to build unknown tag '{other}' of {label}"
            ))),
        }
    }
}

/// Register a cpio deployment assembling `roles` (each at its base path
/// within the image) into `target_file` under `deploy/<name>/`.
///
/// Also publishes `MUDDLE_TARGET_LOCATION` to every package in each role,
/// so makefiles know where their files will finally live.
pub fn deploy(
    ruleset: &mut RuleSet,
    ctx: &mut BuildContext,
    name: &str,
    domain: Option<&str>,
    target_file: &str,
    bases: BTreeMap<String, String>,
    compression: Option<Compression>,
    writer: Option<Arc<dyn CpioWriter>>,
) -> Result<()> {
    for (role, base) in &bases {
        let pattern = Label::package(domain, WILDCARD, Some(role), WILDCARD)?;
        ctx.env_store.set(&pattern, MUDDLE_TARGET_LOCATION, base);
    }

    let action: Arc<dyn Action> = Arc::new(CpioDeployment {
        bases: bases.clone(),
        target_file: target_file.to_string(),
        writer: writer.unwrap_or_else(|| Arc::new(NewcCpioWriter)),
        compression,
    });

    let mut rule = Rule::new(
        Label::deployment(domain, name, tag::DEPLOYED)?,
        Some(action.clone()),
    );
    for role in bases.keys() {
        rule.add(Label::package(
            domain,
            WILDCARD,
            Some(role),
            tag::POST_INSTALLED,
        )?);
    }
    ruleset.add(rule);
    ruleset.add(Rule::new(
        Label::deployment(domain, name, tag::CLEAN)?,
        Some(action),
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use muddle_core::{Database, Layout};

    fn lbl(s: &str) -> Label {
        Label::parse(s).unwrap()
    }

    #[test]
    fn virtual_tree_merge_and_instructions() {
        let tmp = tempfile::tempdir().unwrap();
        let install = tmp.path().join("install/x86");
        fs::create_dir_all(install.join("bin")).unwrap();
        fs::write(install.join("bin/hello"), "x").unwrap();

        let mut tree = VirtualTree::new();
        tree.merge_from_fs(&install, "/").unwrap();
        assert!(matches!(tree.get("/bin"), Some(VirtualEntry::Dir { .. })));
        assert!(matches!(tree.get("/bin/hello"), Some(VirtualEntry::File { .. })));

        tree.apply(&Instruction::Chmod {
            mode: "0755".to_string(),
            filespec: FileSpec::new("/", "bin", true),
        })
        .unwrap();
        match tree.get("/bin/hello").unwrap() {
            VirtualEntry::File { mode, .. } => assert_eq!(*mode, 0o755),
            other => panic!("unexpected entry {other:?}"),
        }

        tree.apply(&Instruction::Mknod {
            node_type: NodeType::Char,
            major: 5,
            minor: 1,
            mode: "0600".to_string(),
            uid: 0,
            gid: 0,
            filename: "/dev/console".to_string(),
        })
        .unwrap();
        assert!(matches!(tree.get("/dev/console"), Some(VirtualEntry::Node { .. })));
    }

    #[test]
    fn newc_writer_produces_a_plausible_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let install = tmp.path().join("install");
        fs::create_dir_all(&install).unwrap();
        fs::write(install.join("init"), "#!/bin/sh\n").unwrap();

        let mut tree = VirtualTree::new();
        tree.merge_from_fs(&install, "/").unwrap();

        let out = tmp.path().join("initrd.cpio");
        NewcCpioWriter.write_archive(&out, &tree).unwrap();
        let data = fs::read(&out).unwrap();
        assert!(data.starts_with(b"070701"));
        let text = String::from_utf8_lossy(&data);
        assert!(text.contains("init"));
        assert!(text.contains("TRAILER!!!"));
        assert_eq!(data.len() % 4, 0);
    }

    #[test]
    fn deploy_wires_role_dependencies_and_env() {
        let mut rs = RuleSet::new();
        let mut ctx = BuildContext::new(Layout::new("/build"), Database::new("/build"));
        deploy(
            &mut rs,
            &mut ctx,
            "firmware",
            None,
            "initrd.cpio",
            BTreeMap::from([("x86".to_string(), "/".to_string())]),
            None,
            None,
        )
        .unwrap();

        let rule = rs.rule_for(&lbl("deployment:firmware/Deployed")).unwrap();
        assert!(rule.deps.contains(&lbl("package:*{x86}/PostInstalled")));

        let env = ctx
            .env_store
            .effective(&lbl("package:hello{x86}/Built"));
        assert_eq!(env.get(MUDDLE_TARGET_LOCATION).unwrap(), "/");
    }
}
