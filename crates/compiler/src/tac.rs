//! Three-address-code buffer and quadruple formatter.
//!
//! The parser appends quadruples `(op, arg1, arg2, result)` as it goes;
//! control-flow jumps are emitted with an empty result and back-patched
//! once the target address is known. Addresses start at 100. The
//! formatter renders the buffer as a fixed-width table, renumbering the
//! synthetic `N<k>` temporaries densely in order of first appearance.

/// Address of the first emitted quadruple.
pub const START_ADDRESS: usize = 100;

/// Column width of every field in the formatted listing.
const FIELD_WIDTH: usize = 13;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quad {
    pub op: String,
    pub arg1: Option<String>,
    pub arg2: Option<String>,
    pub result: Option<String>,
}

#[derive(Debug, Default)]
pub struct QuadBuffer {
    codes: Vec<Quad>,
}

impl QuadBuffer {
    pub fn new() -> Self {
        QuadBuffer { codes: Vec::new() }
    }

    /// Append a quadruple and return its address.
    pub fn emit(
        &mut self,
        op: &str,
        arg1: Option<String>,
        arg2: Option<String>,
        result: Option<String>,
    ) -> usize {
        let address = self.next_address();
        self.codes.push(Quad {
            op: op.to_string(),
            arg1,
            arg2,
            result,
        });
        address
    }

    /// The address the next emitted quadruple will get.
    pub fn next_address(&self) -> usize {
        START_ADDRESS + self.codes.len()
    }

    /// Write a jump target into the result slot of a previously emitted
    /// quadruple.
    pub fn backpatch(&mut self, address: usize, target: usize) {
        let index = address - START_ADDRESS;
        self.codes[index].result = Some(target.to_string());
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn codes(&self) -> &[Quad] {
        &self.codes
    }

    /// Render the buffer as a fixed-width table with a header row.
    /// Empty fields print as `_`.
    pub fn format_listing(&self) -> String {
        let mut renumber = Renumberer::new();
        let mut out = String::new();

        for field in ["address", "op", "arg1", "arg2", "result"] {
            out.push_str(&pad(field));
        }
        let mut listing = out.trim_end().to_string();
        listing.push('\n');

        for (i, quad) in self.codes.iter().enumerate() {
            let mut row = String::new();
            row.push_str(&pad(&(START_ADDRESS + i).to_string()));
            row.push_str(&pad(&renumber.rewrite(&quad.op)));
            for field in [&quad.arg1, &quad.arg2, &quad.result] {
                match field {
                    Some(text) => row.push_str(&pad(&renumber.rewrite(text))),
                    None => row.push_str(&pad("_")),
                }
            }
            listing.push_str(row.trim_end());
            listing.push('\n');
        }
        listing
    }
}

fn pad(field: &str) -> String {
    format!("{:<width$}", field, width = FIELD_WIDTH)
}

/// Rewrites `N<k>` temporary names to a dense numbering in order of
/// first appearance, so the listing stays small and stable.
struct Renumberer {
    map: std::collections::HashMap<String, String>,
    next: usize,
}

impl Renumberer {
    fn new() -> Self {
        Renumberer {
            map: std::collections::HashMap::new(),
            next: 1,
        }
    }

    fn rewrite(&mut self, text: &str) -> String {
        let bytes = text.as_bytes();
        let mut out = String::new();
        let mut i = 0;
        while i < bytes.len() {
            let at_boundary = i == 0 || !is_name_char(bytes[i - 1]);
            if at_boundary && bytes[i] == b'N' {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                let followed_ok = j == bytes.len() || !is_name_char(bytes[j]);
                if j > i + 1 && followed_ok {
                    let name = &text[i..j];
                    let next = &mut self.next;
                    let dense = self.map.entry(name.to_string()).or_insert_with(|| {
                        let fresh = format!("N{}", *next);
                        *next += 1;
                        fresh
                    });
                    out.push_str(dense);
                    i = j;
                    continue;
                }
            }
            out.push(bytes[i] as char);
            i += 1;
        }
        out
    }
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}
