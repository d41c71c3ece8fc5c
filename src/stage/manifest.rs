//! Manifest resolution
//!
//! Renders the manifest template with the cycle fields and the two filesystem
//! helpers, then reads the result as an ordered mapping of group name to file
//! operations:
//!
//! ```yaml
//! atmosphere:
//!   - mkdir: "{{ destination_root }}/gdas.{{ pdy }}/{{ hour }}/model/atmos/input"
//!   - ["{{ ICSDIR }}/{{ cycle_stamp }}/gfs_ctrl.nc", "{{ destination_root }}/gdas.{{ pdy }}/{{ hour }}/model/atmos/input/"]
//!   - src: "{{ ICSDIR }}/{{ cycle_stamp }}/sfc_data.tile*.nc"
//!     dest: "{{ destination_root }}/gdas.{{ pdy }}/{{ hour }}/model/atmos/input/"
//!     optional: true
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::VarValue;
use crate::error::{ConfigurationError, StageError, StageResult};
use crate::stage::cycle::CycleContext;
use crate::stage::glob::expand_glob_strings;
use crate::stage::request::StagingRequest;
use crate::stage::template::{RenderContext, Template, Value};

/// One file operation from the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOperation {
    /// Create a directory (and its parents).
    Mkdir {
        /// Directory to create
        path: PathBuf,
    },
    /// Synchronize `src` (a path or glob pattern) to `dest`.
    Copy {
        /// Source path or pattern
        src: String,
        /// Destination; a trailing `/` means "into this directory"
        dest: String,
        /// Failures are reported and skipped instead of aborting the run
        optional: bool,
    },
}

impl FileOperation {
    /// Whether a failure of this operation is tolerated.
    #[must_use]
    pub const fn is_optional(&self) -> bool {
        matches!(self, Self::Copy { optional: true, .. })
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mkdir { path } => write!(f, "mkdir {}", path.display()),
            Self::Copy {
                src,
                dest,
                optional,
            } => {
                write!(f, "{src} -> {dest}")?;
                if *optional {
                    f.write_str(" (optional)")?;
                }
                Ok(())
            }
        }
    }
}

/// A named, ordered section of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestGroup {
    /// Group name as declared in the template
    pub name: String,
    /// Operations in declaration order
    pub operations: Vec<FileOperation>,
}

/// The resolved manifest: groups in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Groups in declaration order
    pub groups: Vec<ManifestGroup>,
}

impl Manifest {
    /// Total number of operations across all groups.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.groups.iter().map(|g| g.operations.len()).sum()
    }

    /// Find a group by name.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&ManifestGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for group in &self.groups {
            writeln!(f, "{}:", group.name)?;
            for op in &group.operations {
                writeln!(f, "  {op}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CopySpec {
    src: String,
    dest: String,
    #[serde(default)]
    optional: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MkdirSpec {
    mkdir: String,
}

/// Classify one group entry by its YAML shape before typed conversion.
fn parse_operation(value: serde_yaml::Value) -> Result<FileOperation, String> {
    let is_mkdir = value.as_mapping().is_some_and(|m| m.contains_key("mkdir"));
    match value {
        serde_yaml::Value::Sequence(items) => match items.as_slice() {
            [serde_yaml::Value::String(src), serde_yaml::Value::String(dest)] => {
                Ok(FileOperation::Copy {
                    src: src.clone(),
                    dest: dest.clone(),
                    optional: false,
                })
            }
            _ => Err(format!(
                "a copy pair must be exactly [src, dest] strings, got {} item(s)",
                items.len()
            )),
        },
        serde_yaml::Value::Mapping(_) if is_mkdir => {
            let spec: MkdirSpec = serde_yaml::from_value(value).map_err(|e| e.to_string())?;
            Ok(FileOperation::Mkdir {
                path: PathBuf::from(spec.mkdir),
            })
        }
        serde_yaml::Value::Mapping(_) => {
            let spec: CopySpec = serde_yaml::from_value(value).map_err(|e| e.to_string())?;
            Ok(FileOperation::Copy {
                src: spec.src,
                dest: spec.dest,
                optional: spec.optional,
            })
        }
        _ => Err("expected a [src, dest] pair, {src, dest, optional} or {mkdir}".to_string()),
    }
}

/// `path_exists(path)` template helper.
fn path_exists_helper(args: &[Value]) -> Result<Value, String> {
    match args {
        [Value::Str(path)] => Ok(Value::Bool(Path::new(path).exists())),
        _ => Err("expected a single path argument".to_string()),
    }
}

/// `glob(pattern)` template helper.
fn glob_helper(args: &[Value]) -> Result<Value, String> {
    match args {
        [Value::Str(pattern)] => expand_glob_strings(pattern)
            .map(Value::List)
            .map_err(|e| e.to_string()),
        _ => Err("expected a single pattern argument".to_string()),
    }
}

fn var_value(value: &VarValue) -> Value {
    match value {
        VarValue::Bool(b) => Value::Bool(*b),
        VarValue::Integer(n) => Value::Str(n.to_string()),
        VarValue::Text(s) => Value::Str(s.clone()),
        VarValue::List(items) => Value::List(items.clone()),
    }
}

/// Build the render context for a staging run.
///
/// Caller variables go in first so that the built-in cycle fields, paths,
/// flags and helpers always win on a name clash.
#[must_use]
pub fn build_render_context(cycle: &CycleContext, request: &StagingRequest) -> RenderContext {
    let custom = request
        .vars
        .iter()
        .fold(RenderContext::new(), |ctx, (name, value)| {
            ctx.with_var(name.clone(), var_value(value))
        });

    custom
        .with_var("cycle_stamp", cycle.stamp.clone())
        .with_var("year", cycle.year.clone())
        .with_var("month", cycle.month.clone())
        .with_var("day", cycle.day.clone())
        .with_var("hour", cycle.hour.clone())
        .with_var("pdy", cycle.pdy.clone())
        .with_var("current_cycle", cycle.cycle.to_rfc3339())
        .with_var(
            "destination_root",
            request.destination_root.to_string_lossy().into_owned(),
        )
        .with_var(
            "working_dir",
            request.working_dir.to_string_lossy().into_owned(),
        )
        .with_var("download_archive", request.flags.download_archive)
        .with_var("repair_replay", request.flags.repair_replay)
        .with_var("download_analysis", request.flags.download_analysis)
        .with_helper("path_exists", path_exists_helper)
        .with_helper("glob", glob_helper)
}

/// Read the rendered YAML into groups, keeping declaration order.
fn parse_manifest(rendered: &str, template_path: &Path) -> Result<Manifest, ConfigurationError> {
    let malformed = |message: String| ConfigurationError::MalformedManifest {
        path: template_path.to_path_buf(),
        message,
    };

    if rendered.trim().is_empty() {
        return Err(malformed("rendered manifest is empty".to_string()));
    }
    let document: serde_yaml::Value =
        serde_yaml::from_str(rendered).map_err(|e| malformed(e.to_string()))?;

    let mapping = match document {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => return Err(malformed("rendered manifest is empty".to_string())),
        _ => {
            return Err(malformed(
                "top level must be a mapping of group names to operation lists".to_string(),
            ))
        }
    };

    let mut groups = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = match key {
            serde_yaml::Value::String(name) => name,
            other => return Err(malformed(format!("group name must be a string, got {other:?}"))),
        };
        let entries = match value {
            serde_yaml::Value::Null => Vec::new(),
            serde_yaml::Value::Sequence(entries) => entries,
            _ => return Err(malformed(format!("group '{name}' must be a list of operations"))),
        };
        let operations = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                parse_operation(entry)
                    .map_err(|message| malformed(format!("group '{name}' entry {index}: {message}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        groups.push(ManifestGroup { name, operations });
    }

    Ok(Manifest { groups })
}

/// Render and parse manifest template source. `template_path` only labels errors.
pub fn resolve_manifest_source(
    source: &str,
    template_path: &Path,
    ctx: &RenderContext,
) -> StageResult<Manifest> {
    let render_err = |source| StageError::Render {
        template: template_path.to_path_buf(),
        source,
    };
    let template = Template::parse(source).map_err(render_err)?;
    let rendered = template.render(ctx).map_err(render_err)?;
    Ok(parse_manifest(&rendered, template_path)?)
}

/// Read, render and parse the manifest template at `template_path`.
pub fn resolve_manifest(template_path: &Path, ctx: &RenderContext) -> StageResult<Manifest> {
    let source = std::fs::read_to_string(template_path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            ConfigurationError::TemplateNotFound(template_path.to_path_buf())
        } else {
            ConfigurationError::TemplateUnreadable {
                path: template_path.to_path_buf(),
                source: e,
            }
        }
    })?;
    resolve_manifest_source(&source, template_path, ctx)
}
