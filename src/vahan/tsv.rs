use std::io::{self, Write};

const SEP: char = '\t';

fn needs_quotes(cell: &str) -> bool {
    cell.contains([SEP, '"', '\n', '\r'])
}

pub fn write_row<W, I, S>(mut w: W, row: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for (i, cell) in row.into_iter().enumerate() {
        let cell = cell.as_ref();
        if i > 0 {
            write!(w, "{SEP}")?;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    writeln!(w)
}
