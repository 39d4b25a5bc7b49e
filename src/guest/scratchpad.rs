//! Named-value scratchpad
//!
//! A deliberately small guest: a singly linked list of `name = value`
//! entries, each one a single block from the allocator plug-in with the
//! name and value bytes stored after the entry header.

use std::io::Write;
use std::mem::size_of;
use std::ptr;
use std::slice;

use super::{GuestAllocator, GuestError, GuestRuntime};

const SET_USAGE: &str = "set NAME VALUE";
const GET_USAGE: &str = "get NAME";
const DEL_USAGE: &str = "del NAME";

#[repr(C)]
struct Entry {
    next: *mut Entry,
    name_len: usize,
    value_len: usize,
}

impl Entry {
    fn block_len(name_len: usize, value_len: usize) -> usize {
        size_of::<Entry>() + name_len + value_len
    }

    unsafe fn bytes(e: *const Entry) -> *const u8 {
        (e as *const u8).add(size_of::<Entry>())
    }

    unsafe fn name<'a>(e: *const Entry) -> &'a [u8] {
        slice::from_raw_parts(Self::bytes(e), (*e).name_len)
    }

    unsafe fn value<'a>(e: *const Entry) -> &'a [u8] {
        slice::from_raw_parts(Self::bytes(e).add((*e).name_len), (*e).value_len)
    }
}

pub struct Scratchpad {
    alloc: GuestAllocator,
    head: *mut Entry,
    entries: usize,
    bytes: usize,
}

impl Scratchpad {
    pub fn new(alloc: GuestAllocator) -> Self {
        Self {
            alloc,
            head: ptr::null_mut(),
            entries: 0,
            bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Insert or replace. New names go to the end of the list.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), GuestError> {
        let block = Entry::block_len(name.len(), value.len());
        let e = self.alloc.alloc(block)? as *mut Entry;
        unsafe {
            e.write(Entry {
                next: ptr::null_mut(),
                name_len: name.len(),
                value_len: value.len(),
            });
            let dst = Entry::bytes(e) as *mut u8;
            ptr::copy_nonoverlapping(name.as_ptr(), dst, name.len());
            ptr::copy_nonoverlapping(value.as_ptr(), dst.add(name.len()), value.len());
        }

        let mut link: *mut *mut Entry = &mut self.head;
        unsafe {
            while !(*link).is_null() {
                let cur = *link;
                if Entry::name(cur) == name.as_bytes() {
                    (*e).next = (*cur).next;
                    *link = e;
                    self.release(cur);
                    self.entries += 1;
                    self.bytes += block;
                    return Ok(());
                }
                link = ptr::addr_of_mut!((*cur).next);
            }
            *link = e;
        }
        self.entries += 1;
        self.bytes += block;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        let mut cur = self.head;
        while !cur.is_null() {
            unsafe {
                if Entry::name(cur) == name.as_bytes() {
                    return Some(Entry::value(cur));
                }
                cur = (*cur).next;
            }
        }
        None
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let mut link: *mut *mut Entry = &mut self.head;
        unsafe {
            while !(*link).is_null() {
                let cur = *link;
                if Entry::name(cur) == name.as_bytes() {
                    *link = (*cur).next;
                    self.release(cur);
                    return true;
                }
                link = ptr::addr_of_mut!((*cur).next);
            }
        }
        false
    }

    unsafe fn release(&mut self, e: *mut Entry) {
        let block = Entry::block_len((*e).name_len, (*e).value_len);
        self.alloc.free(e as *mut u8, block);
        self.entries -= 1;
        self.bytes -= block;
    }

    fn list(&self, out: &mut dyn Write) -> Result<(), GuestError> {
        let mut cur = self.head;
        while !cur.is_null() {
            unsafe {
                out.write_all(Entry::name(cur))?;
                out.write_all(b" = ")?;
                out.write_all(Entry::value(cur))?;
                out.write_all(b"\n")?;
                cur = (*cur).next;
            }
        }
        Ok(())
    }
}

impl Drop for Scratchpad {
    fn drop(&mut self) {
        while !self.head.is_null() {
            unsafe {
                let e = self.head;
                self.head = (*e).next;
                self.release(e);
            }
        }
    }
}

impl GuestRuntime for Scratchpad {
    fn eval(&mut self, line: &str, out: &mut dyn Write) -> Result<(), GuestError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim_start()),
            None => (line, ""),
        };

        match cmd {
            "set" => {
                let (name, value) = rest
                    .split_once(char::is_whitespace)
                    .map(|(n, v)| (n, v.trim_start()))
                    .ok_or(GuestError::Usage(SET_USAGE))?;
                self.set(name, value)?;
                writeln!(out, "ok")?;
            }
            "get" => {
                let name = single_word(rest, GET_USAGE)?;
                let value = self
                    .get(name)
                    .ok_or_else(|| GuestError::Missing(name.to_string()))?;
                out.write_all(value)?;
                out.write_all(b"\n")?;
            }
            "del" => {
                let name = single_word(rest, DEL_USAGE)?;
                if !self.remove(name) {
                    return Err(GuestError::Missing(name.to_string()));
                }
                writeln!(out, "ok")?;
            }
            "list" => self.list(out)?,
            "stats" => writeln!(out, "entries: {}, bytes: {}", self.entries, self.bytes)?,
            other => return Err(GuestError::UnknownCommand(other.to_string())),
        }
        Ok(())
    }
}

fn single_word<'a>(rest: &'a str, usage: &'static str) -> Result<&'a str, GuestError> {
    if rest.is_empty() || rest.contains(char::is_whitespace) {
        return Err(GuestError::Usage(usage));
    }
    Ok(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    struct Fixture {
        _buf: Vec<u8>,
        arena: Box<Arena>,
    }

    impl Fixture {
        fn new(len: usize) -> Self {
            let mut buf = vec![0u8; len];
            let mut arena = Box::new(Arena::empty());
            unsafe { arena.init(buf.as_mut_ptr(), buf.len()).unwrap() };
            Self { _buf: buf, arena }
        }

        fn pad(&mut self) -> Scratchpad {
            Scratchpad::new(GuestAllocator::for_arena(&mut *self.arena))
        }
    }

    fn eval(pad: &mut Scratchpad, line: &str) -> Result<String, GuestError> {
        let mut out = Vec::new();
        pad.eval(line, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_set_then_get() {
        let mut fx = Fixture::new(16 * 1024);
        let mut pad = fx.pad();

        assert_eq!(eval(&mut pad, "set greeting hello world").unwrap(), "ok\n");
        assert_eq!(eval(&mut pad, "get greeting").unwrap(), "hello world\n");
        assert_eq!(pad.len(), 1);
    }

    #[test]
    fn test_entries_live_in_the_arena() {
        let mut fx = Fixture::new(16 * 1024);
        let arena: *mut Arena = &mut *fx.arena;
        let mut pad = fx.pad();

        pad.set("a", "1").unwrap();
        pad.set("b", "2").unwrap();
        let stats = unsafe { (*arena).stats() };
        assert_eq!(stats.live_blocks, 2);
        assert!(unsafe { (*arena).contains(pad.get("b").unwrap().as_ptr()) });

        drop(pad);
        assert_eq!(unsafe { (*arena).stats() }.live_blocks, 0);
    }

    #[test]
    fn test_set_replaces_existing_value() {
        let mut fx = Fixture::new(16 * 1024);
        let mut pad = fx.pad();

        pad.set("k", "short").unwrap();
        pad.set("other", "x").unwrap();
        pad.set("k", "a much longer value").unwrap();

        assert_eq!(pad.len(), 2);
        assert_eq!(pad.get("k").unwrap(), b"a much longer value");
        assert_eq!(eval(&mut pad, "list").unwrap(), "k = a much longer value\nother = x\n");
    }

    #[test]
    fn test_del_and_missing_names() {
        let mut fx = Fixture::new(16 * 1024);
        let mut pad = fx.pad();

        pad.set("k", "v").unwrap();
        assert_eq!(eval(&mut pad, "del k").unwrap(), "ok\n");
        assert!(pad.is_empty());
        assert!(matches!(eval(&mut pad, "get k"), Err(GuestError::Missing(_))));
        assert!(matches!(eval(&mut pad, "del k"), Err(GuestError::Missing(_))));
    }

    #[test]
    fn test_bad_input() {
        let mut fx = Fixture::new(16 * 1024);
        let mut pad = fx.pad();

        assert!(matches!(eval(&mut pad, "set lonely"), Err(GuestError::Usage(_))));
        assert!(matches!(eval(&mut pad, "get"), Err(GuestError::Usage(_))));
        assert!(matches!(eval(&mut pad, "frobnicate"), Err(GuestError::UnknownCommand(_))));
        assert_eq!(eval(&mut pad, "   ").unwrap(), "");
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let mut fx = Fixture::new(1024);
        let mut pad = fx.pad();

        let big = "x".repeat(4096);
        assert!(matches!(
            pad.set("big", &big),
            Err(GuestError::OutOfMemory { .. })
        ));
        assert!(pad.is_empty());
    }

    #[test]
    fn test_stats_counts_entries() {
        let mut fx = Fixture::new(16 * 1024);
        let mut pad = fx.pad();

        pad.set("a", "1").unwrap();
        let reply = eval(&mut pad, "stats").unwrap();
        assert!(reply.starts_with("entries: 1, bytes: "));
    }
}
