//! Code-block extraction from raw model output.
//!
//! A model answer names each file on its opening fence:
//!
//! ````text
//! ```app.py
//! print("hi")
//! ```
//! ````
//!
//! Everything outside fences is prose and is discarded.

/// Filename used when a completion contains no fenced blocks.
pub const FALLBACK_FILENAME: &str = "app.py";

/// Content used when the completion is empty as well.
pub const EMPTY_COMPLETION_PLACEHOLDER: &str = "print(\"No code generated\")";

const FENCE: &str = "```";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeBlock {
    pub filename: String,
    pub content: String,
}

/// Blocks keyed by filename, in order of first appearance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodeBlocks {
    blocks: Vec<CodeBlock>,
}

impl CodeBlocks {
    /// Insert or replace. A replaced block keeps its original position.
    pub fn insert(&mut self, filename: impl Into<String>, content: impl Into<String>) {
        let filename = filename.into();
        let content = content.into();
        match self.blocks.iter_mut().find(|b| b.filename == filename) {
            Some(existing) => existing.content = content,
            None => self.blocks.push(CodeBlock { filename, content }),
        }
    }

    pub fn get(&self, filename: &str) -> Option<&str> {
        self.blocks
            .iter()
            .find(|b| b.filename == filename)
            .map(|b| b.content.as_str())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.filename.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CodeBlock> {
        self.blocks.iter()
    }
}

impl IntoIterator for CodeBlocks {
    type Item = CodeBlock;
    type IntoIter = std::vec::IntoIter<CodeBlock>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

enum Fence<'a> {
    Open(&'a str),
    Close,
}

/// Classify a line as a fence. Exactly three backticks; indented fences are content.
fn fence(line: &str) -> Option<Fence<'_>> {
    let rest = line.strip_prefix(FENCE)?;
    if rest.starts_with('`') {
        return None;
    }
    match rest.trim() {
        "" => Some(Fence::Close),
        name => Some(Fence::Open(name)),
    }
}

fn commit(blocks: &mut CodeBlocks, filename: &str, lines: &[&str]) {
    // Empty blocks are dropped and never shadow an earlier block of the same name.
    if !lines.is_empty() {
        blocks.insert(filename, lines.join("\n"));
    }
}

/// Split model output into named blocks.
///
/// Blank lines inside a block are dropped. A block left open at the end of
/// the text is kept. A bare fence with no open block is ignored.
pub fn extract(text: &str) -> CodeBlocks {
    let mut blocks = CodeBlocks::default();
    let mut current: Option<(&str, Vec<&str>)> = None;

    for line in text.lines() {
        match fence(line) {
            Some(Fence::Open(name)) => {
                if let Some((filename, lines)) = current.take() {
                    commit(&mut blocks, filename, &lines);
                }
                current = Some((name, Vec::new()));
            }
            Some(Fence::Close) => {
                if let Some((filename, lines)) = current.take() {
                    commit(&mut blocks, filename, &lines);
                }
            }
            None => {
                if let Some((_, lines)) = current.as_mut() {
                    if !line.trim().is_empty() {
                        lines.push(line);
                    }
                }
            }
        }
    }

    if let Some((filename, lines)) = current {
        commit(&mut blocks, filename, &lines);
    }
    blocks
}

/// Single-file stand-in for a completion without fences.
pub fn fallback_blocks(raw: &str) -> CodeBlocks {
    let content = if raw.trim().is_empty() {
        EMPTY_COMPLETION_PLACEHOLDER
    } else {
        raw
    };
    let mut blocks = CodeBlocks::default();
    blocks.insert(FALLBACK_FILENAME, content);
    blocks
}
