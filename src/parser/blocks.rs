use std::sync::LazyLock;

use regex::Regex;

use super::rich_text::{tokenize, TextSpan};

static DIVIDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-*_]{3,}$").unwrap());
static NUMBERED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\.\s+(.+)$").unwrap());
static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-•*]\s+(.*)$").unwrap());
static NESTED_BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{2,}[-•*]\s+(.+)$").unwrap());
static ALL_BOLD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\*\*.*\*\*$").unwrap());
static TABLE_SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\s|:\-]+$").unwrap());

/// Bullets shorter than this that contain a `?` are promoted to sub-headings.
const QUESTION_HEADING_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, spans: Vec<TextSpan> },
    Paragraph(Vec<TextSpan>),
    BulletListItem(BulletItem),
    NumberedListItem(Vec<TextSpan>),
    Divider,
    /// Preformatted text. Markdown tables end up here verbatim.
    CodeBlock(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletItem {
    pub spans: Vec<TextSpan>,
    pub children: Vec<BulletItem>,
}

impl BulletItem {
    fn new(spans: Vec<TextSpan>) -> Self {
        Self {
            spans,
            children: Vec::new(),
        }
    }
}

/// Convert loosely structured LLM markdown into typed blocks in one pass.
///
/// Never fails: anything unrecognised becomes a paragraph.
pub fn parse_blocks(text: &str) -> Vec<Block> {
    let mut parser = BlockParser::default();
    for line in text.split('\n') {
        parser.feed(line);
    }
    parser.finish()
}

#[derive(Default)]
struct BlockParser {
    blocks: Vec<Block>,
    bullets: Vec<BulletItem>,
    numbered: Vec<Vec<TextSpan>>,
    table: Vec<String>,
    in_table: bool,
}

impl BlockParser {
    fn feed(&mut self, raw: &str) {
        let line = raw.trim();

        // ── Blank line ends every open run ──
        if line.is_empty() {
            self.flush_table();
            self.flush_lists();
            return;
        }

        // ── Table row: |a|b| ──
        if line.starts_with('|') && line.ends_with('|') {
            if !self.in_table {
                self.flush_lists();
                self.in_table = true;
            }
            self.table.push(line.to_string());
            return;
        }

        // Table ended on this line; classify the line normally below.
        if self.in_table {
            self.flush_table();
        }

        // ── Heading: # / ## / ### / #### ──
        if let Some((level, rest)) = heading(line) {
            self.flush_lists();
            self.blocks.push(Block::Heading {
                level,
                spans: tokenize(rest),
            });
            return;
        }

        // ── Divider: --- / *** / ___ ──
        if DIVIDER_RE.is_match(line) {
            self.flush_lists();
            self.blocks.push(Block::Divider);
            return;
        }

        // ── Numbered item: 1. text ──
        if let Some(caps) = NUMBERED_RE.captures(line) {
            self.flush_bullets();
            self.numbered.push(tokenize(&caps[2]));
            return;
        }

        // ── Nested bullet: judged on the untrimmed line, indentation is gone after trim ──
        // Sub-heading promotion applies to top-level bullets only.
        if let Some(caps) = NESTED_BULLET_RE.captures(raw.trim_end()) {
            let child = BulletItem::new(tokenize(caps[1].trim()));
            match self.bullets.last_mut() {
                Some(parent) => parent.children.push(child),
                None => {
                    self.flush_lists();
                    self.bullets.push(child);
                }
            }
            return;
        }

        // ── Bullet: - / • / * text ──
        if let Some(caps) = BULLET_RE.captures(line) {
            let content = caps[1].trim();
            if is_sub_heading(content) {
                self.flush_lists();
                let text = content.replace("**", "");
                self.blocks.push(Block::Heading {
                    level: 3,
                    spans: tokenize(text.trim()),
                });
                return;
            }
            self.flush_numbered();
            self.bullets.push(BulletItem::new(tokenize(content)));
            return;
        }

        // ── Plain paragraph ──
        self.flush_lists();
        self.blocks.push(Block::Paragraph(tokenize(line)));
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush_table();
        self.flush_lists();
        self.blocks
    }

    fn flush_bullets(&mut self) {
        self.blocks
            .extend(self.bullets.drain(..).map(Block::BulletListItem));
    }

    fn flush_numbered(&mut self) {
        self.blocks
            .extend(self.numbered.drain(..).map(Block::NumberedListItem));
    }

    fn flush_lists(&mut self) {
        self.flush_bullets();
        self.flush_numbered();
    }

    /// Emit the buffered table as a code block, or drop it if it has no data rows.
    fn flush_table(&mut self) {
        if !self.in_table && self.table.is_empty() {
            return;
        }
        self.in_table = false;
        let rows = std::mem::take(&mut self.table);
        if rows.len() < 2 {
            return;
        }
        let data_rows = rows.iter().filter(|r| !TABLE_SEPARATOR_RE.is_match(r)).count();
        if data_rows == 0 {
            return;
        }
        self.blocks.push(Block::CodeBlock(rows.join("\n")));
    }
}

/// `###` and `####` share level 3; the store's heading model stops there.
fn heading(line: &str) -> Option<(u8, &str)> {
    let (level, rest) = if let Some(rest) = line.strip_prefix("####") {
        (3, rest)
    } else if let Some(rest) = line.strip_prefix("###") {
        (3, rest)
    } else if let Some(rest) = line.strip_prefix("##") {
        (2, rest)
    } else if let Some(rest) = line.strip_prefix('#') {
        (1, rest)
    } else {
        return None;
    };
    Some((level, rest.trim_start()))
}

fn is_sub_heading(content: &str) -> bool {
    ALL_BOLD_RE.is_match(content)
        || (content.contains('?') && content.chars().count() < QUESTION_HEADING_MAX_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(s: &str) -> Vec<TextSpan> {
        vec![TextSpan::plain(s)]
    }

    fn bullet(s: &str) -> Block {
        Block::BulletListItem(BulletItem::new(plain(s)))
    }

    #[test]
    fn heading_levels() {
        assert_eq!(
            parse_blocks("# Title"),
            vec![Block::Heading { level: 1, spans: plain("Title") }]
        );
        let blocks = parse_blocks("## Two\n### Three\n#### Four");
        let levels: Vec<u8> = blocks
            .iter()
            .map(|b| match b {
                Block::Heading { level, .. } => *level,
                other => panic!("unexpected block {:?}", other),
            })
            .collect();
        assert_eq!(levels, vec![2, 3, 3]);
    }

    #[test]
    fn blank_line_flushes_list_before_paragraph() {
        assert_eq!(
            parse_blocks("- a\n- b\n\nc"),
            vec![bullet("a"), bullet("b"), Block::Paragraph(plain("c"))]
        );
    }

    #[test]
    fn single_table_row_is_discarded() {
        assert!(parse_blocks("|a|b|").is_empty());
    }

    #[test]
    fn separator_only_table_is_discarded() {
        assert!(parse_blocks("|---|---|\n|:--|--:|").is_empty());
    }

    #[test]
    fn table_becomes_code_block() {
        assert_eq!(
            parse_blocks("|h1|h2|\n|--|--|\n|x|y|"),
            vec![Block::CodeBlock("|h1|h2|\n|--|--|\n|x|y|".into())]
        );
    }

    #[test]
    fn line_after_table_is_reclassified() {
        let blocks = parse_blocks("|h|\n|x|\n## After");
        assert_eq!(blocks.len(), 2);
        assert!(matches!(&blocks[0], Block::CodeBlock(_)));
        assert_eq!(blocks[1], Block::Heading { level: 2, spans: plain("After") });
    }

    #[test]
    fn table_start_flushes_open_list() {
        let blocks = parse_blocks("- item\n|a|b|\n|c|d|");
        assert_eq!(blocks[0], bullet("item"));
        assert!(matches!(&blocks[1], Block::CodeBlock(_)));
    }

    #[test]
    fn divider() {
        assert_eq!(parse_blocks("---"), vec![Block::Divider]);
        assert_eq!(parse_blocks("***"), vec![Block::Divider]);
        assert_eq!(parse_blocks("_____"), vec![Block::Divider]);
    }

    #[test]
    fn bold_bullet_becomes_sub_heading() {
        assert_eq!(
            parse_blocks("- **Bold only**"),
            vec![Block::Heading { level: 3, spans: plain("Bold only") }]
        );
    }

    #[test]
    fn short_question_bullet_becomes_sub_heading() {
        let blocks = parse_blocks("- Who is the target customer?");
        assert_eq!(
            blocks,
            vec![Block::Heading { level: 3, spans: plain("Who is the target customer?") }]
        );
    }

    #[test]
    fn long_question_bullet_stays_bullet() {
        let long = format!("- {}?", "x".repeat(120));
        let blocks = parse_blocks(&long);
        assert!(matches!(&blocks[0], Block::BulletListItem(_)));
    }

    #[test]
    fn numbered_run_and_bullet_run_do_not_mix() {
        let blocks = parse_blocks("1. one\n2. two\n- dot");
        assert_eq!(
            blocks,
            vec![
                Block::NumberedListItem(plain("one")),
                Block::NumberedListItem(plain("two")),
                bullet("dot"),
            ]
        );
    }

    #[test]
    fn nested_bullet_attaches_to_last_item() {
        let blocks = parse_blocks("- parent\n  - child one\n  - child two\n- sibling");
        assert_eq!(blocks.len(), 2);
        match &blocks[0] {
            Block::BulletListItem(item) => {
                assert_eq!(item.spans, plain("parent"));
                assert_eq!(
                    item.children,
                    vec![
                        BulletItem::new(plain("child one")),
                        BulletItem::new(plain("child two")),
                    ]
                );
            }
            other => panic!("expected bullet, got {:?}", other),
        }
        assert_eq!(blocks[1], bullet("sibling"));
    }

    #[test]
    fn orphan_nested_bullet_starts_top_level_run() {
        let blocks = parse_blocks("Intro\n\n  - orphan");
        assert_eq!(blocks, vec![Block::Paragraph(plain("Intro")), bullet("orphan")]);
    }

    #[test]
    fn inline_bold_survives_in_paragraph() {
        assert_eq!(
            parse_blocks("Revenue is **high**"),
            vec![Block::Paragraph(vec![
                TextSpan::plain("Revenue is "),
                TextSpan::bold("high"),
            ])]
        );
    }

    #[test]
    fn malformed_markdown_degrades_to_paragraphs() {
        let blocks = parse_blocks("| not a table\n** unclosed\n1.no space");
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| matches!(b, Block::Paragraph(_))));
    }

    #[test]
    fn empty_input() {
        assert!(parse_blocks("").is_empty());
        assert!(parse_blocks("\n\n  \n").is_empty());
    }

    #[test]
    fn trailing_table_is_flushed_at_end() {
        let blocks = parse_blocks("Intro\n|a|b|\n|1|2|");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1], Block::CodeBlock("|a|b|\n|1|2|".into()));
    }

    #[test]
    fn indented_question_stays_a_bullet() {
        let blocks = parse_blocks("1. x\n   - Who is the target customer?");
        assert_eq!(
            blocks,
            vec![
                Block::NumberedListItem(vec![TextSpan::plain("x")]),
                Block::BulletListItem(BulletItem::new(vec![TextSpan::plain(
                    "Who is the target customer?"
                )])),
            ]
        );
    }
}
