use std::fmt;

/// An argument vector for a privileged command.
///
/// Never passed through a shell by this crate. Arguments marked secret are
/// masked in [`CommandLine::redacted`], which is what tracing output uses;
/// the audit log receives [`CommandLine::argv`] in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    args: Vec<String>,
    secret: Vec<bool>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            args: vec![program.into()],
            secret: vec![false],
        }
    }

    /// Build from a configured argv; `None` when empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, rest) = argv.split_first()?;
        Some(Self::new(program.clone()).args(rest.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self.secret.push(false);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// An argument that must not appear in general logs.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self.secret.push(true);
        self
    }

    pub fn program(&self) -> &str {
        &self.args[0]
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    pub fn redacted(&self) -> String {
        self.args
            .iter()
            .zip(&self.secret)
            .map(|(arg, secret)| if *secret { "***" } else { arg.as_str() })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}
