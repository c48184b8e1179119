//! Manifest byte layout
//!
//! ```text
//! <cmd>;<b64 app json>;<b64 version json>;[<b64 jar-password-map json>;]<segment>...
//! ```
//!
//! Segments follow [`crate::segment`]'s layout and appear in registration
//! order. The manifest is plaintext here; [`crate::builder`] seals it.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::descriptor::{Descriptor, DescriptorKind};
use crate::error::{PackError, PackResult};
use crate::segment::{Segment, SegmentKind, FIELD_SEPARATOR};

/// Per-class cipher metadata returned by the jar encryption step.
pub type JarPasswordMap = BTreeMap<String, String>;

/// What the agent is asked to do with the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "install-app")]
    InstallApp,
    #[serde(rename = "install-plugin")]
    InstallPlugin,
    #[serde(rename = "install-jdk")]
    InstallJdk,
}

impl Command {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Command::InstallApp => "install-app",
            Command::InstallPlugin => "install-plugin",
            Command::InstallJdk => "install-jdk",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl FromStr for Command {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install-app" => Ok(Command::InstallApp),
            "install-plugin" => Ok(Command::InstallPlugin),
            "install-jdk" => Ok(Command::InstallJdk),
            other => Err(PackError::Format(format!("Unknown command: {}", other))),
        }
    }
}

/// Writes the manifest header; segments are appended by the caller.
pub struct ManifestWriter<W: Write> {
    out: W,
}

impl<W: Write> ManifestWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write `<cmd>;<b64 app>;<b64 version>;` and, if present, the password map field.
    pub fn write_header(
        &mut self,
        command: Command,
        app: &Descriptor,
        version: &Descriptor,
        passwords: Option<&JarPasswordMap>,
    ) -> PackResult<()> {
        self.write_field(command.as_tag().as_bytes())?;
        self.write_field(STANDARD.encode(app.to_json()?).as_bytes())?;
        self.write_field(STANDARD.encode(version.to_json()?).as_bytes())?;
        if let Some(map) = passwords {
            let json = serde_json::to_vec(map)?;
            self.write_field(STANDARD.encode(json).as_bytes())?;
        }
        Ok(())
    }

    /// Access the underlying writer to append encoded segments.
    pub fn segments(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_field(&mut self, field: &[u8]) -> PackResult<()> {
        self.out.write_all(field)?;
        self.out.write_all(&[FIELD_SEPARATOR])?;
        Ok(())
    }
}

/// A fully decoded manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub command: Command,
    pub app: Descriptor,
    pub version: Descriptor,
    pub passwords: Option<JarPasswordMap>,
    pub segments: Vec<Segment>,
}

impl Manifest {
    /// Decode a manifest whose wrapped keys are `wrapped_key_len` bytes long.
    pub fn parse(bytes: &[u8], wrapped_key_len: usize) -> PackResult<Self> {
        let mut reader = ManifestReader::new(bytes, wrapped_key_len);
        let (command, app, version) = reader.read_header()?;
        let mut segments = Vec::new();
        while let Some(segment) = reader.next_segment()? {
            segments.push(segment);
        }
        Ok(Self {
            command,
            app,
            version,
            passwords: reader.take_passwords(),
            segments,
        })
    }

    /// Segment kinds in manifest order.
    pub fn kinds(&self) -> Vec<SegmentKind> {
        self.segments.iter().map(|s| s.kind).collect()
    }
}

/// Streaming manifest decoder.
pub struct ManifestReader<R: BufRead> {
    reader: R,
    wrapped_key_len: usize,
    passwords: Option<JarPasswordMap>,
    seen_segment: bool,
}

impl<R: BufRead> ManifestReader<R> {
    pub fn new(reader: R, wrapped_key_len: usize) -> Self {
        Self {
            reader,
            wrapped_key_len,
            passwords: None,
            seen_segment: false,
        }
    }

    /// Read the command and both descriptors.
    pub fn read_header(&mut self) -> PackResult<(Command, Descriptor, Descriptor)> {
        let token = self.required_token("command")?;
        let command: Command = std::str::from_utf8(&token)
            .map_err(|_| PackError::Format("Command is not UTF-8".into()))?
            .parse()?;
        let app = self.descriptor_field(DescriptorKind::App)?;
        let version = self.descriptor_field(DescriptorKind::Version)?;
        Ok((command, app, version))
    }

    /// Read the next segment, or `None` at end of input.
    ///
    /// Before the first segment a token that is not a segment kind is taken
    /// as the jar password map.
    pub fn next_segment(&mut self) -> PackResult<Option<Segment>> {
        loop {
            let token = match self.token()? {
                Some(token) => token,
                None => return Ok(None),
            };

            if let Ok(kind) = std::str::from_utf8(&token).unwrap_or("").parse::<SegmentKind>() {
                self.seen_segment = true;
                let segment = Segment::read_body(kind, &mut self.reader, self.wrapped_key_len)?;
                return Ok(Some(segment));
            }

            if self.seen_segment || self.passwords.is_some() {
                return Err(PackError::Format(format!(
                    "Expected a segment kind, found {:?}",
                    String::from_utf8_lossy(&token)
                )));
            }
            self.passwords = Some(decode_passwords(&token)?);
        }
    }

    /// Password map seen so far, if any.
    pub fn passwords(&self) -> Option<&JarPasswordMap> {
        self.passwords.as_ref()
    }

    pub fn take_passwords(&mut self) -> Option<JarPasswordMap> {
        self.passwords.take()
    }

    fn descriptor_field(&mut self, kind: DescriptorKind) -> PackResult<Descriptor> {
        let field = self.required_token("descriptor")?;
        let json = STANDARD
            .decode(&field)
            .map_err(|e| PackError::Format(format!("{:?} descriptor is not base64: {}", kind, e)))?;
        Descriptor::from_json(kind, &json)
    }

    fn required_token(&mut self, what: &str) -> PackResult<Vec<u8>> {
        self.token()?
            .ok_or_else(|| PackError::Format(format!("Manifest ended before the {}", what)))
    }

    /// Next `;`-terminated token; `None` only at a clean end of input.
    fn token(&mut self) -> PackResult<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(FIELD_SEPARATOR, &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if buf.pop() != Some(FIELD_SEPARATOR) {
            return Err(PackError::Format(format!(
                "Unterminated manifest field: {:?}",
                String::from_utf8_lossy(&buf)
            )));
        }
        Ok(Some(buf))
    }
}

fn decode_passwords(token: &[u8]) -> PackResult<JarPasswordMap> {
    let json = STANDARD
        .decode(token)
        .map_err(|e| PackError::Format(format!("Jar password map is not base64: {}", e)))?;
    Ok(serde_json::from_slice(&json)?)
}
