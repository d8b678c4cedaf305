//! Plain-text editing buffer for the source pane.
//!
//! The cursor is a byte offset that always sits on a char boundary. Every
//! mutating method returns whether the text changed so the caller knows
//! when to notify the render scheduler.

use unicode_width::UnicodeWidthChar;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorPosition {
    pub line: usize,
    /// Display column, in terminal cells.
    pub column: usize,
}

#[derive(Clone, Debug, Default)]
pub struct TextEditor {
    text: String,
    cursor: usize,
    preferred_column: Option<usize>,
}

impl TextEditor {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cursor: 0,
            preferred_column: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.cursor = 0;
        self.preferred_column = None;
    }

    pub fn line_count(&self) -> usize {
        self.text.split('\n').count()
    }

    pub fn cursor_position(&self) -> CursorPosition {
        let start = self.line_start(self.cursor);
        CursorPosition {
            line: self.text[..start].matches('\n').count(),
            column: self.text[start..self.cursor]
                .chars()
                .map(|ch| UnicodeWidthChar::width(ch).unwrap_or(0))
                .sum(),
        }
    }

    pub fn insert_char(&mut self, ch: char) -> bool {
        self.text.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
        self.preferred_column = None;
        true
    }

    pub fn insert_str(&mut self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        self.text.insert_str(self.cursor, value);
        self.cursor += value.len();
        self.preferred_column = None;
        true
    }

    pub fn backspace(&mut self) -> bool {
        let Some(prev) = self.prev_boundary() else {
            return false;
        };
        self.text.replace_range(prev..self.cursor, "");
        self.cursor = prev;
        self.preferred_column = None;
        true
    }

    pub fn delete(&mut self) -> bool {
        let Some(next) = self.next_boundary() else {
            return false;
        };
        self.text.replace_range(self.cursor..next, "");
        self.preferred_column = None;
        true
    }

    pub fn move_left(&mut self) -> bool {
        self.preferred_column = None;
        match self.prev_boundary() {
            Some(prev) => {
                self.cursor = prev;
                true
            }
            None => false,
        }
    }

    pub fn move_right(&mut self) -> bool {
        self.preferred_column = None;
        match self.next_boundary() {
            Some(next) => {
                self.cursor = next;
                true
            }
            None => false,
        }
    }

    pub fn move_up(&mut self) -> bool {
        let start = self.line_start(self.cursor);
        if start == 0 {
            return false;
        }
        let column = self.remember_column();
        let prev_start = self.line_start(start - 1);
        self.cursor = self.offset_in_line(prev_start, column);
        true
    }

    pub fn move_down(&mut self) -> bool {
        let end = self.line_end(self.cursor);
        if end == self.text.len() {
            return false;
        }
        let column = self.remember_column();
        self.cursor = self.offset_in_line(end + 1, column);
        true
    }

    pub fn move_to_line_start(&mut self) -> bool {
        self.preferred_column = None;
        let start = self.line_start(self.cursor);
        let moved = start != self.cursor;
        self.cursor = start;
        moved
    }

    pub fn move_to_line_end(&mut self) -> bool {
        self.preferred_column = None;
        let end = self.line_end(self.cursor);
        let moved = end != self.cursor;
        self.cursor = end;
        moved
    }

    fn remember_column(&mut self) -> usize {
        let start = self.line_start(self.cursor);
        let current = self.text[start..self.cursor].chars().count();
        *self.preferred_column.get_or_insert(current)
    }

    /// Byte offset of char `column` in the line starting at `start`, clamped
    /// to the line end.
    fn offset_in_line(&self, start: usize, column: usize) -> usize {
        let end = self.line_end(start);
        self.text[start..end]
            .char_indices()
            .nth(column)
            .map(|(idx, _)| start + idx)
            .unwrap_or(end)
    }

    fn line_start(&self, pos: usize) -> usize {
        self.text[..pos].rfind('\n').map(|idx| idx + 1).unwrap_or(0)
    }

    fn line_end(&self, pos: usize) -> usize {
        self.text[pos..]
            .find('\n')
            .map(|idx| pos + idx)
            .unwrap_or(self.text.len())
    }

    fn prev_boundary(&self) -> Option<usize> {
        self.text[..self.cursor]
            .chars()
            .next_back()
            .map(|ch| self.cursor - ch.len_utf8())
    }

    fn next_boundary(&self) -> Option<usize> {
        self.text[self.cursor..]
            .chars()
            .next()
            .map(|ch| self.cursor + ch.len_utf8())
    }
}

#[cfg(test)]
#[path = "editor_tests.rs"]
mod editor_tests;
