use std::path::{Path, PathBuf};

use market::Symbol;

/// Symbol-scoped output layout:
///
/// ```text
/// <root>/symbol=<lowercase symbol>/decisions.jsonl
/// <root>/symbol=<lowercase symbol>/events.jsonl
/// ```
#[derive(Debug, Clone)]
pub struct OutputPaths {
    root: PathBuf,
}

impl OutputPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn symbol_dir(&self, symbol: &Symbol) -> PathBuf {
        self.root
            .join(format!("symbol={}", symbol.as_str().to_lowercase()))
    }

    pub fn decisions(&self, symbol: &Symbol) -> PathBuf {
        self.symbol_dir(symbol).join("decisions.jsonl")
    }

    pub fn events(&self, symbol: &Symbol) -> PathBuf {
        self.symbol_dir(symbol).join("events.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_partitioned_by_lowercase_symbol() {
        let paths = OutputPaths::new("/tmp/gate");
        let sym = Symbol::new("BTCUSDT");

        assert_eq!(paths.symbol_dir(&sym), PathBuf::from("/tmp/gate/symbol=btcusdt"));
        assert_eq!(
            paths.decisions(&sym),
            PathBuf::from("/tmp/gate/symbol=btcusdt/decisions.jsonl")
        );
        assert_eq!(
            paths.events(&sym),
            PathBuf::from("/tmp/gate/symbol=btcusdt/events.jsonl")
        );
    }
}
