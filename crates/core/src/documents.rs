//! Brochure text chunking for the stored-passage knowledge base.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkOptions {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self { max_chars: 800, overlap_chars: 120 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentChunk {
    pub index: usize,
    pub text: String,
}

/// Splits text into paragraph-aligned chunks of at most `max_chars`
/// characters. Each chunk after the first starts with the word-aligned tail
/// of its predecessor, up to `overlap_chars`.
pub fn chunk_text(text: &str, options: ChunkOptions) -> Vec<DocumentChunk> {
    let max_chars = options.max_chars.max(1);
    let overlap = options.overlap_chars.min(max_chars / 2);

    let mut pieces = Vec::new();
    for paragraph in text.split("\n\n").map(normalize_whitespace).filter(|p| !p.is_empty()) {
        if char_len(&paragraph) <= max_chars {
            pieces.push(paragraph);
        } else {
            pieces.extend(split_long(&paragraph, max_chars));
        }
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if current.is_empty() {
            current = piece;
            continue;
        }
        if char_len(&current) + 2 + char_len(&piece) <= max_chars {
            current.push_str("\n\n");
            current.push_str(&piece);
            continue;
        }

        let tail = overlap_tail(&current, overlap);
        chunks.push(std::mem::take(&mut current));
        current = if !tail.is_empty() && char_len(&tail) + 1 + char_len(&piece) <= max_chars {
            format!("{tail} {piece}")
        } else {
            piece
        };
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks.into_iter().enumerate().map(|(index, text)| DocumentChunk { index, text }).collect()
}

fn normalize_whitespace(paragraph: &str) -> String {
    paragraph.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for word in paragraph.split(' ') {
        let word_len = char_len(word);
        if word_len > max_chars {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            let chars = word.chars().collect::<Vec<_>>();
            parts.extend(chars.chunks(max_chars).map(|chunk| chunk.iter().collect::<String>()));
            continue;
        }
        let needed = if current.is_empty() { word_len } else { char_len(&current) + 1 + word_len };
        if needed > max_chars {
            parts.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let mut tail: Vec<&str> = Vec::new();
    let mut length = 0;
    for word in chunk.split_whitespace().rev() {
        let added = if tail.is_empty() { char_len(word) } else { char_len(word) + 1 };
        if length + added > overlap {
            break;
        }
        length += added;
        tail.push(word);
    }
    tail.reverse();
    tail.join(" ")
}
