//! Interactive session around the built-in guest
//!
//! Lines are read straight from fd 0 into a buffer on the task stack. Going
//! through `std::io::Stdin` would leave its buffer in the host heap, and
//! bytes it had read ahead would not be part of a checkpoint.

use std::io::{self, IsTerminal, Write};

use crate::error::{Result, SnapError};
use crate::guest::{GuestAllocator, GuestRuntime, Scratchpad};
use crate::managed::{Managed, Resumption};

const LINE_MAX: usize = 4096;

enum Line {
    Text(usize),
    TooLong,
    Eof,
}

fn read_byte() -> Result<Option<u8>> {
    let mut byte = 0u8;
    loop {
        let n = unsafe { libc::read(libc::STDIN_FILENO, &mut byte as *mut u8 as *mut libc::c_void, 1) };
        match n {
            1 => return Ok(Some(byte)),
            0 => return Ok(None),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(SnapError::Io(err));
                }
            }
        }
    }
}

fn read_line(buf: &mut [u8; LINE_MAX]) -> Result<Line> {
    let mut len = 0;
    let mut overflow = false;
    loop {
        match read_byte()? {
            None if len == 0 && !overflow => return Ok(Line::Eof),
            None | Some(b'\n') => break,
            Some(b) if len < buf.len() => {
                buf[len] = b;
                len += 1;
            }
            Some(_) => overflow = true,
        }
    }
    if overflow {
        return Ok(Line::TooLong);
    }
    if len > 0 && buf[len - 1] == b'\r' {
        len -= 1;
    }
    Ok(Line::Text(len))
}

fn prompt(interactive: bool) -> Result<()> {
    if interactive {
        let mut out = io::stdout().lock();
        write!(out, "> ")?;
        out.flush()?;
    }
    Ok(())
}

pub fn run(cx: &mut Managed) -> Result<()> {
    let mut guest = Scratchpad::new(GuestAllocator::for_arena(cx.arena_ptr()));
    let mut buf = [0u8; LINE_MAX];

    loop {
        prompt(io::stdout().is_terminal())?;
        let len = match read_line(&mut buf)? {
            Line::Text(len) => len,
            Line::TooLong => {
                eprintln!("error: line longer than {} bytes", LINE_MAX);
                continue;
            }
            Line::Eof => break,
        };
        let line = match std::str::from_utf8(&buf[..len]) {
            Ok(line) => line.trim(),
            Err(_) => {
                eprintln!("error: input is not valid UTF-8");
                continue;
            }
        };

        match line {
            ":save" => match cx.checkpoint()? {
                Resumption::Saved => println!("State saved."),
                Resumption::Restored => println!("State restored."),
            },
            ":restore" => cx.request_restore(),
            _ => {
                if let Err(err) = guest.eval(line, &mut io::stdout().lock()) {
                    println!("error: {}", err);
                }
            }
        }
    }

    log::debug!("End of input, {} entries in the scratchpad", guest.len());
    Ok(())
}
