use crate::Language;

/// Static per-language execution settings.
///
/// Memory enforcement is not uniform across runtimes: VM-based runtimes
/// accept a heap-size flag, while Python only exposes an in-process
/// `resource` primitive. The strategy is data here, not a branch at the
/// call site.
#[derive(Debug, Clone, Copy)]
pub struct LanguageConfig {
    pub file_name: &'static str,
    pub program: &'static str,
    memory: MemoryStrategy,
}

#[derive(Debug, Clone, Copy)]
enum MemoryStrategy {
    /// Heap ceiling passed as a command-line flag, e.g. `-Xmx128m`.
    HeapFlag {
        prefix: &'static str,
        suffix: &'static str,
    },
    /// `resource.setrlimit` prologue injected ahead of user code, run
    /// inline via `-c` so no source file is materialized.
    InlinePrologue,
}

/// A fully built subprocess invocation: the program, its argument vector
/// (never joined through a shell), and the source file to materialize in
/// the working directory, if the runtime reads one.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub source_file: Option<SourceFile>,
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
}

const JAVASCRIPT: LanguageConfig = LanguageConfig {
    file_name: "main.js",
    program: "node",
    memory: MemoryStrategy::HeapFlag {
        prefix: "--max-old-space-size=",
        suffix: "",
    },
};

const PYTHON: LanguageConfig = LanguageConfig {
    file_name: "main.py",
    program: "python3",
    memory: MemoryStrategy::InlinePrologue,
};

const JAVA: LanguageConfig = LanguageConfig {
    file_name: "Main.java",
    program: "java",
    memory: MemoryStrategy::HeapFlag {
        prefix: "-Xmx",
        suffix: "m",
    },
};

impl LanguageConfig {
    pub fn resolve(language: Language) -> &'static LanguageConfig {
        match language {
            Language::Javascript => &JAVASCRIPT,
            Language::Python => &PYTHON,
            Language::Java => &JAVA,
        }
    }

    /// Build the subprocess invocation for one run of `source_code` under a
    /// `memory_limit_mb` ceiling.
    pub fn build_invocation(&self, source_code: &str, memory_limit_mb: u64) -> Invocation {
        match self.memory {
            MemoryStrategy::HeapFlag { prefix, suffix } => Invocation {
                program: self.program.to_string(),
                args: vec![
                    format!("{}{}{}", prefix, memory_limit_mb, suffix),
                    self.file_name.to_string(),
                ],
                source_file: Some(SourceFile {
                    name: self.file_name.to_string(),
                    contents: source_code.to_string(),
                }),
            },
            MemoryStrategy::InlinePrologue => Invocation {
                program: self.program.to_string(),
                args: vec![
                    "-c".to_string(),
                    wrap_with_rlimit(source_code, memory_limit_mb),
                ],
                source_file: None,
            },
        }
    }
}

/// Address-space limit prologue, best effort: skipped silently where the
/// platform or permissions do not allow it.
fn wrap_with_rlimit(user_code: &str, memory_limit_mb: u64) -> String {
    format!(
        "try:\n\
         \x20   import resource\n\
         \x20   limit_bytes = {} * 1024 * 1024\n\
         \x20   resource.setrlimit(resource.RLIMIT_AS, (limit_bytes, limit_bytes))\n\
         except (ImportError, ValueError, OSError):\n\
         \x20   pass\n\
         \n\
         {}",
        memory_limit_mb, user_code
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_javascript_invocation_uses_heap_flag() {
        let config = LanguageConfig::resolve(Language::Javascript);
        let invocation = config.build_invocation("console.log(1)", 128);

        assert_eq!(invocation.program, "node");
        assert_eq!(invocation.args[0], "--max-old-space-size=128");
        assert_eq!(invocation.args[1], "main.js");
        let file = invocation.source_file.unwrap();
        assert_eq!(file.name, "main.js");
        assert_eq!(file.contents, "console.log(1)");
    }

    #[test]
    fn test_java_invocation_uses_xmx_flag() {
        let config = LanguageConfig::resolve(Language::Java);
        let invocation = config.build_invocation("class Main {}", 256);

        assert_eq!(invocation.program, "java");
        assert_eq!(invocation.args[0], "-Xmx256m");
        assert_eq!(invocation.source_file.unwrap().name, "Main.java");
    }

    #[test]
    fn test_python_invocation_injects_rlimit_prologue() {
        let config = LanguageConfig::resolve(Language::Python);
        let invocation = config.build_invocation("print('hi')", 128);

        assert_eq!(invocation.program, "python3");
        assert_eq!(invocation.args[0], "-c");
        assert!(invocation.source_file.is_none());

        let wrapped = &invocation.args[1];
        assert!(wrapped.contains("resource.setrlimit"));
        assert!(wrapped.contains("128 * 1024 * 1024"));
        assert!(wrapped.ends_with("print('hi')"));
    }
}
