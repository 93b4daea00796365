//! Evaluation frames
//!
//! A frame is never mutated once built. Nested scopes derive a new frame
//! from their parent and push it onto a [`PersistentStack`], which shares
//! structure with every other stack branched from the same ancestors.
//! Concurrent evaluations therefore never see each other's state.

use mush_core::{DbRef, MString};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Link<T> {
    value: T,
    next: Option<Arc<Link<T>>>,
}

/// Immutable singly-linked stack with structural sharing
pub struct PersistentStack<T> {
    head: Option<Arc<Link<T>>>,
    len: usize,
}

impl<T> PersistentStack<T> {
    pub fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// A new stack with `value` on top; `self` is untouched
    pub fn push(&self, value: T) -> Self {
        Self {
            head: Some(Arc::new(Link {
                value,
                next: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// The stack below the top
    pub fn pop(&self) -> Self {
        match &self.head {
            Some(link) => Self {
                head: link.next.clone(),
                len: self.len - 1,
            },
            None => Self::new(),
        }
    }

    pub fn peek(&self) -> Option<&T> {
        self.head.as_deref().map(|link| &link.value)
    }

    /// `n`th element from the top
    pub fn get(&self, n: usize) -> Option<&T> {
        self.iter().nth(n)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            next: self.head.as_deref(),
        }
    }
}

impl<T> Clone for PersistentStack<T> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for PersistentStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistentStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

pub struct Iter<'a, T> {
    next: Option<&'a Link<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let link = self.next?;
        self.next = link.next.as_deref();
        Some(&link.value)
    }
}

/// Q-register table of one evaluation chain.
///
/// `setq()` in one sibling is visible to the siblings after it, so frames
/// of a chain share one table. `ulocal()`-style calls fork a private copy.
#[derive(Debug, Clone, Default)]
pub struct RegisterScope(Arc<RwLock<HashMap<String, MString>>>);

impl RegisterScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<MString> {
        self.0.read().get(&name.to_ascii_uppercase()).cloned()
    }

    pub fn set(&self, name: &str, value: MString) {
        self.0.write().insert(name.to_ascii_uppercase(), value);
    }

    /// Independent copy of the current contents
    pub fn fork(&self) -> Self {
        Self(Arc::new(RwLock::new(self.0.read().clone())))
    }

    pub fn snapshot(&self) -> HashMap<String, MString> {
        self.0.read().clone()
    }
}

/// One level of `iter()` state
#[derive(Debug, Clone)]
pub struct IterationRegister {
    pub value: MString,
    /// 1-based position in the list
    pub index: usize,
    halted: Arc<AtomicBool>,
}

impl IterationRegister {
    pub fn new(value: MString, index: usize, halted: Arc<AtomicBool>) -> Self {
        Self {
            value,
            index,
            halted,
        }
    }

    /// Ask the owning loop to stop after the current element
    pub fn halt(&self) {
        self.halted.store(true, Ordering::Relaxed);
    }
}

/// The attribute whose text is being evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRef {
    pub object: DbRef,
    pub path: String,
}

/// One evaluation scope
#[derive(Debug, Clone)]
pub struct Frame {
    pub registers: RegisterScope,
    pub iteration: PersistentStack<IterationRegister>,
    pub captures: PersistentStack<Arc<HashMap<String, MString>>>,
    /// `%0` - `%9`
    pub arguments: Arc<Vec<MString>>,
    pub current_attribute: Option<AttributeRef>,
    pub command: Option<Arc<str>>,
    pub switches: Arc<Vec<String>>,
    pub function: Option<Arc<str>>,
    /// Function nesting depth
    pub depth: usize,
    /// Occurrences of each function name in the active call chain
    pub recursion: Arc<HashMap<String, usize>>,
    pub executor: DbRef,
    pub enactor: DbRef,
    pub caller: DbRef,
    pub handle: Option<u64>,
}

impl Frame {
    /// Root frame of a top-level evaluation
    pub fn new(executor: DbRef, enactor: DbRef, caller: DbRef) -> Self {
        Self {
            registers: RegisterScope::new(),
            iteration: PersistentStack::new(),
            captures: PersistentStack::new(),
            arguments: Arc::new(Vec::new()),
            current_attribute: None,
            command: None,
            switches: Arc::new(Vec::new()),
            function: None,
            depth: 0,
            recursion: Arc::new(HashMap::new()),
            executor,
            enactor,
            caller,
            handle: None,
        }
    }

    /// Root frame for a command typed on a connection
    pub fn for_connection(player: DbRef, handle: u64) -> Self {
        let mut frame = Self::new(player, player, player);
        frame.handle = Some(handle);
        frame
    }

    /// Frame for a call to `name`: depth and the name's count go up by one
    pub fn entering_function(&self, name: &str) -> Self {
        let key = name.to_ascii_lowercase();
        let mut recursion = (*self.recursion).clone();
        *recursion.entry(key).or_insert(0) += 1;

        let mut frame = self.clone();
        frame.depth = self.depth + 1;
        frame.recursion = Arc::new(recursion);
        frame.function = Some(Arc::from(name));
        frame
    }

    pub fn recursion_count(&self, name: &str) -> usize {
        self.recursion
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn with_arguments(&self, arguments: Vec<MString>) -> Self {
        let mut frame = self.clone();
        frame.arguments = Arc::new(arguments);
        frame
    }

    pub fn with_command(&self, name: &str, switches: Vec<String>) -> Self {
        let mut frame = self.clone();
        frame.command = Some(Arc::from(name));
        frame.switches = Arc::new(switches);
        frame
    }

    pub fn with_iteration(&self, register: IterationRegister) -> Self {
        let mut frame = self.clone();
        frame.iteration = self.iteration.push(register);
        frame
    }

    pub fn with_captures(&self, captures: HashMap<String, MString>) -> Self {
        let mut frame = self.clone();
        frame.captures = self.captures.push(Arc::new(captures));
        frame
    }

    /// Run as another object; the current executor becomes the caller
    pub fn with_executor(&self, executor: DbRef) -> Self {
        let mut frame = self.clone();
        frame.caller = self.executor;
        frame.executor = executor;
        frame
    }

    pub fn with_enactor(&self, enactor: DbRef) -> Self {
        let mut frame = self.clone();
        frame.enactor = enactor;
        frame
    }

    pub fn with_attribute(&self, attribute: AttributeRef) -> Self {
        let mut frame = self.clone();
        frame.current_attribute = Some(attribute);
        frame
    }

    pub fn with_local_registers(&self) -> Self {
        let mut frame = self.clone();
        frame.registers = self.registers.fork();
        frame
    }

    pub fn argument(&self, index: usize) -> MString {
        self.arguments.get(index).cloned().unwrap_or_default()
    }

    pub fn iteration_register(&self, level: usize) -> Option<&IterationRegister> {
        self.iteration.get(level)
    }

    /// Innermost regex capture named `name`
    pub fn capture(&self, name: &str) -> Option<MString> {
        self.captures.peek().and_then(|c| c.get(name).cloned())
    }
}

/// The frames of one evaluation, innermost first. Never empty.
#[derive(Debug, Clone)]
pub struct FrameStack {
    top: Arc<Frame>,
    parents: PersistentStack<Arc<Frame>>,
}

impl FrameStack {
    pub fn new(root: Frame) -> Self {
        Self {
            top: Arc::new(root),
            parents: PersistentStack::new(),
        }
    }

    pub fn push(&self, frame: Frame) -> Self {
        Self {
            top: Arc::new(frame),
            parents: self.parents.push(Arc::clone(&self.top)),
        }
    }

    pub fn top(&self) -> &Frame {
        &self.top
    }

    pub fn len(&self) -> usize {
        self.parents.len() + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        std::iter::once(self.top.as_ref()).chain(self.parents.iter().map(|f| f.as_ref()))
    }
}

/// Outcome of evaluating an expression
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallResult {
    pub message: MString,
    /// Nesting depth the value was produced at
    pub depth: usize,
}

impl CallResult {
    pub fn new(message: MString, depth: usize) -> Self {
        Self { message, depth }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_does_not_disturb_parent() {
        let base: PersistentStack<i32> = PersistentStack::new().push(1).push(2);
        let left = base.push(3);
        let right = base.push(4);

        assert_eq!(base.len(), 2);
        assert_eq!(left.peek(), Some(&3));
        assert_eq!(right.peek(), Some(&4));
        assert_eq!(left.pop().peek(), Some(&2));
        assert_eq!(right.iter().copied().collect::<Vec<_>>(), vec![4, 2, 1]);
        assert!(PersistentStack::<i32>::new().pop().is_empty());
    }

    #[test]
    fn test_entering_function_counts() {
        let root = Frame::new(DbRef(1), DbRef(1), DbRef(1));
        let once = root.entering_function("U");
        let twice = once.entering_function("u").entering_function("add");

        assert_eq!(root.depth, 0);
        assert_eq!(once.depth, 1);
        assert_eq!(twice.depth, 3);
        assert_eq!(twice.recursion_count("u"), 2);
        assert_eq!(twice.recursion_count("ADD"), 1);
        assert_eq!(once.recursion_count("u"), 1);
        assert_eq!(root.recursion_count("u"), 0);
    }

    #[test]
    fn test_registers_shared_until_forked() {
        let root = Frame::new(DbRef(1), DbRef(1), DbRef(1));
        let child = root.entering_function("setq");
        child.registers.set("a", MString::from("1"));
        assert_eq!(root.registers.get("A").map(|v| v.into_plain()), Some("1".to_string()));

        let local = root.with_local_registers();
        local.registers.set("a", MString::from("2"));
        assert_eq!(root.registers.get("a").map(|v| v.into_plain()), Some("1".to_string()));
        assert_eq!(local.registers.get("a").map(|v| v.into_plain()), Some("2".to_string()));
    }

    #[test]
    fn test_frame_stack_branches() {
        let root = FrameStack::new(Frame::new(DbRef(1), DbRef(1), DbRef(1)));
        let inner = root.push(root.top().entering_function("u"));
        let sibling = root.push(root.top().entering_function("add"));

        assert_eq!(root.len(), 1);
        assert_eq!(inner.len(), 2);
        assert_eq!(inner.top().depth, 1);
        assert_eq!(sibling.top().function.as_deref(), Some("add"));
        let depths: Vec<usize> = inner.iter().map(|f| f.depth).collect();
        assert_eq!(depths, vec![1, 0]);
    }

    #[test]
    fn test_with_executor_shifts_caller() {
        let root = Frame::new(DbRef(1), DbRef(2), DbRef(1));
        let frame = root.with_executor(DbRef(9));
        assert_eq!(frame.executor, DbRef(9));
        assert_eq!(frame.caller, DbRef(1));
        assert_eq!(frame.enactor, DbRef(2));
    }
}
