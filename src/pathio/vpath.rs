//! Virtual path (`/disk/p1/p2`) to DOS path (`disk:\p1\p2`) mapping.

/// A parsed virtual path: lowercased components, drive letter split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VPath {
    /// Drive letter, lowercase, e.g. `"c"`. `None` for the synthetic root.
    drive: Option<String>,
    /// Path components below the drive, lowercase.
    parts: Vec<String>,
}

impl VPath {
    /// Parse a POSIX-style absolute virtual path such as `/c/foo/bar`.
    pub fn parse(raw: &str) -> Self {
        let mut components = raw
            .split('/')
            .filter(|c| !c.is_empty())
            .map(str::to_lowercase);

        let drive = components.next();
        let parts: Vec<String> = components.collect();

        VPath { drive, parts }
    }

    /// Depth: 0 for `/`, 1 for `/c`, 2+ for `/c/foo`, `/c/foo/bar`, ...
    pub fn depth(&self) -> usize {
        match &self.drive {
            None => 0,
            Some(_) => 1 + self.parts.len(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.drive.is_none()
    }

    pub fn is_drive_root(&self) -> bool {
        self.drive.is_some() && self.parts.is_empty()
    }

    pub fn drive(&self) -> Option<&str> {
        self.drive.as_deref()
    }

    /// The final path component (file or directory name), lowercase.
    /// `None` for the root and for drive roots.
    pub fn name(&self) -> Option<&str> {
        self.parts.last().map(String::as_str)
    }

    /// The parent of this path. Walking past the root returns the root
    /// again rather than panicking or producing an invalid path.
    pub fn parent(&self) -> VPath {
        if self.parts.is_empty() {
            // Drive root's parent is the synthetic root; root's parent is itself.
            return VPath {
                drive: None,
                parts: Vec::new(),
            };
        }
        let mut parts = self.parts.clone();
        parts.pop();
        VPath {
            drive: self.drive.clone(),
            parts,
        }
    }

    /// Append a child component (e.g. a `list()` entry name).
    pub fn join(&self, child: &str) -> VPath {
        let mut parts = self.parts.clone();
        parts.push(child.to_lowercase());
        VPath {
            drive: self.drive.clone(),
            parts,
        }
    }

    /// Render as the FTP-facing virtual path string.
    pub fn to_virtual(&self) -> String {
        match &self.drive {
            None => "/".to_string(),
            Some(d) => {
                let mut s = format!("/{d}");
                for p in &self.parts {
                    s.push('/');
                    s.push_str(p);
                }
                s
            }
        }
    }

    /// Render the DOS drive-root argument, e.g. `c:`. Panics if this is the
    /// synthetic root — callers must check `is_root()` first.
    pub fn drive_arg(&self) -> String {
        format!("{}:", self.drive.as_deref().expect("no drive on root path"))
    }

    /// Render the full DOS path used in shell commands, e.g. `c:\foo\bar`.
    /// For a drive root this is `c:\`.
    pub fn to_dos(&self) -> String {
        let drive = self.drive.as_deref().expect("no drive on root path");
        if self.parts.is_empty() {
            format!("{drive}:\\")
        } else {
            format!("{}:\\{}", drive, self.parts.join("\\"))
        }
    }

    /// The DOS directory argument used to list this path's *contents*:
    /// `c:\` for a drive root, `c:\foo` for a subdirectory.
    pub fn to_dos_dir_arg(&self) -> String {
        self.to_dos()
    }
}
