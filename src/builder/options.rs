//! Compiler command line options.
//!
//! Options are declared in configuration by name and validated against a
//! built-in catalog. Each catalog entry knows how to render a configured value
//! into a single command line argument. The computed arguments (target
//! platform, output path, modules to compile and their search folders) are
//! appended from the module list of the current run.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::core::module::LoadedModule;
use crate::util::fs::relative_path;

/// Supplies the argument vector for a compiler run.
///
/// Implementations are queried from the worker thread.
pub trait ArgumentSource: Send + Sync {
    fn arguments(&self, modules: &[LoadedModule]) -> Result<Vec<String>>;
}

/// How a catalog option renders its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// `--name` when the value is true, nothing otherwise.
    Flag,
    /// `--name=Value` for one of the listed values, matched case-insensitively.
    Enum(&'static [&'static str]),
    /// `--name=value` for any non-empty value.
    Str,
}

/// A named entry of the option catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
}

const fn flag(name: &'static str) -> OptionSpec {
    OptionSpec {
        name,
        kind: OptionKind::Flag,
    }
}

const fn string(name: &'static str) -> OptionSpec {
    OptionSpec {
        name,
        kind: OptionKind::Str,
    }
}

const fn choice(name: &'static str, values: &'static [&'static str]) -> OptionSpec {
    OptionSpec {
        name,
        kind: OptionKind::Enum(values),
    }
}

const TARGETS: &[&str] = &[
    "Auto", "X86_SSE2", "X86_SSE4", "X64_SSE2", "X64_SSE4", "AVX", "AVX2",
];
const FLOAT_PRECISIONS: &[&str] = &["Standard", "High", "Medium", "Low"];
const FLOAT_MODES: &[&str] = &["Default", "Strict", "Deterministic", "Fast"];
const DUMPS: &[&str] = &[
    "None",
    "IL",
    "Backend",
    "IR",
    "IROptimized",
    "Asm",
    "Function",
    "Analysis",
    "IRPassAnalysis",
    "ILPre",
    "All",
];
const FORMATS: &[&str] = &["Elf", "Coff", "MachO", "Wasm"];
const DEBUG_LEVELS: &[&str] = &["None", "Full", "LineOnly"];
const OUTPUT_MODES: &[&str] = &["SingleLibrary", "LibraryPerJob"];

/// Single-valued options, in the order they are emitted.
///
/// `platform` is absent on purpose: it is always computed.
pub const OPTIONS: &[OptionSpec] = &[
    string("backend"),
    flag("safety-checks"),
    flag("disable-opt"),
    flag("fastmath"),
    string("opt-level"),
    flag("opt-for-size"),
    choice("float-precision", FLOAT_PRECISIONS),
    choice("float-mode", FLOAT_MODES),
    choice("format", FORMATS),
    flag("debugtrap"),
    flag("disable-vectors"),
    choice("debug", DEBUG_LEVELS),
    flag("debugMode"),
    flag("generate-static-linkage-methods"),
    flag("generate-job-marshalling-methods"),
    string("temp-folder"),
    flag("enable-direct-external-linking"),
    flag("use-platform-sdk-linkers"),
    flag("keep-intermediate-files"),
    flag("nolink"),
    flag("no-native-toolchain"),
    flag("emit-llvm-objects"),
    string("key-folder"),
    string("decode-folder"),
    string("threads"),
    flag("verbose"),
    // Takes `true`/`false`, but as a value.
    string("include-root-assembly-references"),
    flag("validate-external-tool-chain"),
    string("patch-assemblies-into"),
    string("pinvoke-name"),
    flag("only-static-methods"),
    string("method-prefix"),
    string("chunk-size"),
    flag("log-timings"),
    flag("enable-guard"),
    flag("print-monopinvokecallbackmissing-message"),
    choice("output-mode", OUTPUT_MODES),
    string("always-create-output"),
    string("cache_directory"),
    flag("only-list-methods"),
];

/// Options that may be given several times, in the order they are emitted.
pub const MULTI_OPTIONS: &[OptionSpec] = &[
    choice("target", TARGETS),
    choice("dump", DUMPS),
    string("disable-warnings"),
    string("compilation-defines"),
    string("linker-options"),
    string("pdb-search-paths"),
    string("root-assembly"),
    string("assembly-folder"),
];

/// A configured option value as written in TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Str(s) => f.write_str(s),
        }
    }
}

impl OptionSpec {
    /// Render a configured value, or explain why it was rejected.
    ///
    /// `Ok(None)` means the value is valid but produces no argument, such as
    /// a flag set to false.
    pub fn render(&self, value: &OptionValue) -> Result<Option<String>, String> {
        match self.kind {
            OptionKind::Flag => {
                let set = match value {
                    OptionValue::Bool(b) => *b,
                    OptionValue::Str(s) => s.eq_ignore_ascii_case("true"),
                    OptionValue::Int(_) => {
                        return Err(format!("`{}` expects true or false", self.name))
                    }
                };
                Ok(set.then(|| format!("--{}", self.name)))
            }
            OptionKind::Enum(values) => {
                let text = value.to_string();
                if text.is_empty() {
                    return Ok(None);
                }
                values
                    .iter()
                    .find(|v| v.eq_ignore_ascii_case(&text))
                    .map(|v| Some(format!("--{}={}", self.name, v)))
                    .ok_or_else(|| {
                        format!(
                            "invalid value `{}` for `{}`, expected one of: {}",
                            text,
                            self.name,
                            values.join(", ")
                        )
                    })
            }
            OptionKind::Str => {
                let text = value.to_string();
                Ok((!text.is_empty()).then(|| format!("--{}={}", self.name, text)))
            }
        }
    }
}

/// Target platform passed to the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Platform of the running host.
    pub fn host() -> Self {
        match std::env::consts::OS {
            "windows" => Platform::Windows,
            "macos" => Platform::MacOs,
            _ => Platform::Linux,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
        })
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "windows" => Ok(Platform::Windows),
            "macos" | "osx" => Ok(Platform::MacOs),
            "linux" => Ok(Platform::Linux),
            _ => bail!("unknown platform `{}`, expected Windows, macOS or Linux", s),
        }
    }
}

/// Argument vector built from declared options plus the modules of a run.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    root: PathBuf,
    artifact: PathBuf,
    platform: Platform,
    configured: Vec<String>,
    reference_dirs: Vec<PathBuf>,
}

impl CompilerOptions {
    /// Options for a compiler running in `root` and producing `artifact`.
    pub fn new(root: impl Into<PathBuf>, artifact: impl Into<PathBuf>) -> Self {
        CompilerOptions {
            root: root.into(),
            artifact: artifact.into(),
            platform: Platform::host(),
            configured: Vec::new(),
            reference_dirs: Vec::new(),
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Extra folders searched for referenced assemblies.
    pub fn with_reference_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.reference_dirs = dirs;
        self
    }

    /// Validate declared options against the catalog.
    ///
    /// Arguments follow catalog order, not declaration order, so reordering
    /// a config file never changes the command line. Unknown names and
    /// invalid values are reported and skipped.
    pub fn with_declared(
        mut self,
        options: &BTreeMap<String, OptionValue>,
        multi: &BTreeMap<String, Vec<OptionValue>>,
    ) -> Self {
        for spec in OPTIONS {
            if let Some(value) = options.get(spec.name) {
                self.push_rendered(spec, value);
            }
        }
        for spec in MULTI_OPTIONS {
            for value in multi.get(spec.name).into_iter().flatten() {
                self.push_rendered(spec, value);
            }
        }

        for name in options.keys() {
            if !OPTIONS.iter().any(|s| s.name == name.as_str()) {
                tracing::warn!("ignoring unknown compiler option `{}`", name);
            }
        }
        for name in multi.keys() {
            if !MULTI_OPTIONS.iter().any(|s| s.name == name.as_str()) {
                tracing::warn!("ignoring unknown repeatable compiler option `{}`", name);
            }
        }

        self
    }

    fn push_rendered(&mut self, spec: &OptionSpec, value: &OptionValue) {
        match spec.render(value) {
            Ok(Some(arg)) => self.configured.push(arg),
            Ok(None) => {}
            Err(reason) => tracing::warn!("{}", reason),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Arguments derived from declared options only.
    pub fn configured(&self) -> &[String] {
        &self.configured
    }

    /// Output argument: the artifact path without extension, relative to the root.
    fn output_arg(&self) -> String {
        let output = relative_path(&self.root, &self.artifact.with_extension(""));
        format!("--output={}", output.display())
    }
}

impl ArgumentSource for CompilerOptions {
    fn arguments(&self, modules: &[LoadedModule]) -> Result<Vec<String>> {
        let mut args = Vec::with_capacity(self.configured.len() + modules.len() * 2 + 2);
        args.push(format!("--platform={}", self.platform));
        args.push(self.output_arg());
        args.extend(self.configured.iter().cloned());

        // Folder order follows module order so the command line is stable.
        let mut seen = HashSet::new();
        let mut folders = Vec::new();
        for module in modules {
            args.push(format!("--root-assembly={}", module.path.display()));
            if let Some(parent) = module.path.parent() {
                if seen.insert(parent.to_path_buf()) {
                    folders.push(parent.to_path_buf());
                }
            }
        }

        for folder in folders
            .iter()
            .chain(self.reference_dirs.iter().filter(|d| !seen.contains(*d)))
        {
            args.push(format!("--assembly-folder={}", folder.display()));
        }

        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn module(path: &str) -> LoadedModule {
        LoadedModule {
            identity: path.to_string(),
            content_hash: Uuid::nil(),
            version: None,
            path: PathBuf::from(path),
        }
    }

    fn catalog_entry(name: &str) -> &'static OptionSpec {
        OPTIONS
            .iter()
            .chain(MULTI_OPTIONS)
            .find(|s| s.name == name)
            .unwrap()
    }

    #[test]
    fn test_flag_rendering() {
        let fastmath = catalog_entry("fastmath");
        assert_eq!(
            fastmath.render(&OptionValue::Bool(true)),
            Ok(Some("--fastmath".into()))
        );
        assert_eq!(fastmath.render(&OptionValue::Bool(false)), Ok(None));
        assert_eq!(
            fastmath.render(&OptionValue::Str("True".into())),
            Ok(Some("--fastmath".into()))
        );
        assert!(fastmath.render(&OptionValue::Int(1)).is_err());
    }

    #[test]
    fn test_enum_rendering_uses_canonical_spelling() {
        let mode = catalog_entry("float-mode");
        assert_eq!(
            mode.render(&OptionValue::Str("fast".into())),
            Ok(Some("--float-mode=Fast".into()))
        );
        assert!(mode.render(&OptionValue::Str("quick".into())).is_err());
        assert_eq!(mode.render(&OptionValue::Str(String::new())), Ok(None));
    }

    #[test]
    fn test_string_rendering() {
        let threads = catalog_entry("threads");
        assert_eq!(
            threads.render(&OptionValue::Int(4)),
            Ok(Some("--threads=4".into()))
        );
        assert_eq!(threads.render(&OptionValue::Str(String::new())), Ok(None));

        let refs = catalog_entry("include-root-assembly-references");
        assert_eq!(
            refs.render(&OptionValue::Bool(false)),
            Ok(Some("--include-root-assembly-references=false".into()))
        );
    }

    #[test]
    fn test_platform_parsing() {
        assert_eq!("MACOS".parse::<Platform>().unwrap(), Platform::MacOs);
        assert_eq!(Platform::MacOs.to_string(), "macOS");
        assert!("beos".parse::<Platform>().is_err());
    }

    #[test]
    fn test_declared_options_follow_catalog_order() {
        let mut options = BTreeMap::new();
        options.insert("threads".to_string(), OptionValue::Int(2));
        options.insert("backend".to_string(), OptionValue::Str("burst-llvm".into()));
        options.insert("no-such-option".to_string(), OptionValue::Bool(true));
        options.insert("float-mode".to_string(), OptionValue::Str("bogus".into()));
        let mut multi = BTreeMap::new();
        multi.insert(
            "target".to_string(),
            vec![
                OptionValue::Str("x64_sse4".into()),
                OptionValue::Str("avx2".into()),
            ],
        );

        let opts = CompilerOptions::new("/game", "/game/lib.so").with_declared(&options, &multi);

        assert_eq!(
            opts.configured(),
            [
                "--backend=burst-llvm",
                "--threads=2",
                "--target=X64_SSE4",
                "--target=AVX2",
            ]
        );
    }

    #[test]
    fn test_computed_arguments() {
        let opts = CompilerOptions::new("/game", "/game/Data/Plugins/lib_generated.so")
            .with_platform(Platform::Linux)
            .with_reference_dirs(vec![PathBuf::from("/game/Managed"), PathBuf::from("/mods/A")]);

        let args = opts
            .arguments(&[
                module("/mods/A/One.dll"),
                module("/mods/B/Two.dll"),
                module("/mods/A/Three.dll"),
            ])
            .unwrap();

        assert_eq!(
            args,
            [
                "--platform=Linux",
                "--output=Data/Plugins/lib_generated",
                "--root-assembly=/mods/A/One.dll",
                "--root-assembly=/mods/B/Two.dll",
                "--root-assembly=/mods/A/Three.dll",
                "--assembly-folder=/mods/A",
                "--assembly-folder=/mods/B",
                "--assembly-folder=/game/Managed",
            ]
        );
    }
}
