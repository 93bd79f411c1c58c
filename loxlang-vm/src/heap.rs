// loxlang-vm - Bytecode compiler and virtual machine for the Lox programming language
// Copyright (c) 2025 Tom Waddington. MIT licensed.

//! Object heap and mark-sweep garbage collector.
//!
//! Objects live in a slot arena and are addressed by [`ObjHandle`] indices;
//! freed slots go on a free list and are reused by later allocations. The
//! collector is a precise tri-color mark-sweep: the VM grays its roots,
//! [`Heap::trace_references`] drains the gray worklist blackening objects,
//! the intern table drops entries for unmarked strings, and the sweep frees
//! whatever stayed white.
//!
//! The intern table lives here because it is half of the string lifecycle:
//! [`Heap::intern`] guarantees at most one string object per distinct byte
//! sequence, so handle equality is content equality.

use std::mem;
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::object::{
    hash_str, BoundMethodObj, ClassObj, ClosureObj, FunctionObj, InstanceObj, NativeObj, Obj,
    ObjHandle, StrObj, UpvalueObj,
};
use crate::table::Table;
use crate::value::{format_number, Value};

/// First collection threshold, doubled after every cycle.
const FIRST_GC_THRESHOLD: usize = 1024 * 1024;
const GC_HEAP_GROW_FACTOR: usize = 2;

#[derive(Debug)]
struct Slot {
    obj: Obj,
    marked: bool,
    /// Size charged to `bytes_allocated` at allocation time; objects can
    /// grow afterwards, so the sweep refunds exactly this amount.
    size: usize,
}

/// The object arena, collector state, and string intern table.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    bytes_allocated: usize,
    next_gc: usize,
    gray: Vec<ObjHandle>,
    strings: Table,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            bytes_allocated: 0,
            next_gc: FIRST_GC_THRESHOLD,
            gray: Vec::new(),
            strings: Table::new(),
        }
    }

    // =========================================================================
    // Allocation & interning
    // =========================================================================

    /// Allocate an object, reusing a free slot when one exists.
    pub fn alloc(&mut self, obj: Obj) -> ObjHandle {
        let size = obj_size(&obj);
        self.bytes_allocated += size;

        let slot = Slot {
            obj,
            marked: false,
            size,
        };
        let handle = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(slot);
                ObjHandle(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Some(slot));
                ObjHandle(index)
            }
        };

        #[cfg(feature = "gc-log")]
        eprintln!(
            "{:>4} allocate {} bytes for {}",
            handle.0,
            size,
            self.get(handle).kind_name()
        );

        handle
    }

    /// Return the handle of the interned string equal to `s`, allocating
    /// and registering it on first sight.
    pub fn intern(&mut self, s: &str) -> ObjHandle {
        let hash = hash_str(s);
        let slots = &self.slots;
        let found = self.strings.find_key(hash, |key| {
            matches!(&slots[key.index()], Some(Slot { obj: Obj::Str(existing), .. })
                if &*existing.chars == s)
        });
        if let Some(handle) = found {
            return handle;
        }

        let handle = self.alloc(Obj::Str(StrObj {
            chars: s.into(),
            hash,
        }));
        self.strings.set(handle, hash, Value::Nil);
        handle
    }

    /// True once the allocation debt crosses the collection threshold.
    /// Under `gc-stress`, always true.
    pub fn should_collect(&self) -> bool {
        if cfg!(feature = "gc-stress") {
            return true;
        }
        self.bytes_allocated > self.next_gc
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn get(&self, handle: ObjHandle) -> &Obj {
        &self
            .slots[handle.index()]
            .as_ref()
            .expect("dangling object handle")
            .obj
    }

    pub fn get_mut(&mut self, handle: ObjHandle) -> &mut Obj {
        &mut self
            .slots[handle.index()]
            .as_mut()
            .expect("dangling object handle")
            .obj
    }

    pub fn as_str(&self, handle: ObjHandle) -> &str {
        match self.get(handle) {
            Obj::Str(s) => &s.chars,
            other => panic!("expected string, found {}", other.kind_name()),
        }
    }

    pub fn str_hash(&self, handle: ObjHandle) -> u32 {
        match self.get(handle) {
            Obj::Str(s) => s.hash,
            other => panic!("expected string, found {}", other.kind_name()),
        }
    }

    pub fn function(&self, handle: ObjHandle) -> &FunctionObj {
        match self.get(handle) {
            Obj::Function(f) => f,
            other => panic!("expected function, found {}", other.kind_name()),
        }
    }

    pub fn closure(&self, handle: ObjHandle) -> &ClosureObj {
        match self.get(handle) {
            Obj::Closure(c) => c,
            other => panic!("expected closure, found {}", other.kind_name()),
        }
    }

    pub fn closure_mut(&mut self, handle: ObjHandle) -> &mut ClosureObj {
        match self.get_mut(handle) {
            Obj::Closure(c) => c,
            other => panic!("expected closure, found {}", other.kind_name()),
        }
    }

    pub fn upvalue(&self, handle: ObjHandle) -> &UpvalueObj {
        match self.get(handle) {
            Obj::Upvalue(u) => u,
            other => panic!("expected upvalue, found {}", other.kind_name()),
        }
    }

    pub fn upvalue_mut(&mut self, handle: ObjHandle) -> &mut UpvalueObj {
        match self.get_mut(handle) {
            Obj::Upvalue(u) => u,
            other => panic!("expected upvalue, found {}", other.kind_name()),
        }
    }

    pub fn class(&self, handle: ObjHandle) -> &ClassObj {
        match self.get(handle) {
            Obj::Class(c) => c,
            other => panic!("expected class, found {}", other.kind_name()),
        }
    }

    pub fn class_mut(&mut self, handle: ObjHandle) -> &mut ClassObj {
        match self.get_mut(handle) {
            Obj::Class(c) => c,
            other => panic!("expected class, found {}", other.kind_name()),
        }
    }

    pub fn instance(&self, handle: ObjHandle) -> &InstanceObj {
        match self.get(handle) {
            Obj::Instance(i) => i,
            other => panic!("expected instance, found {}", other.kind_name()),
        }
    }

    pub fn instance_mut(&mut self, handle: ObjHandle) -> &mut InstanceObj {
        match self.get_mut(handle) {
            Obj::Instance(i) => i,
            other => panic!("expected instance, found {}", other.kind_name()),
        }
    }

    /// The chunk of the function a closure wraps.
    pub fn closure_chunk(&self, closure: ObjHandle) -> Rc<Chunk> {
        let function = self.closure(closure).function;
        Rc::clone(&self.function(function).chunk)
    }

    /// Name of the function a closure wraps, or `None` for the script.
    pub fn closure_name(&self, closure: ObjHandle) -> Option<&str> {
        let function = self.closure(closure).function;
        self.function(function).name.map(|name| self.as_str(name))
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Gray a value's object, if it has one.
    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(handle) = value {
            self.mark_object(handle);
        }
    }

    /// Gray an object: set its mark bit and queue it for tracing.
    pub fn mark_object(&mut self, handle: ObjHandle) {
        let slot = self.slots[handle.index()]
            .as_mut()
            .expect("marking a freed object");
        if slot.marked {
            return;
        }
        slot.marked = true;

        #[cfg(feature = "gc-log")]
        eprintln!("{:>4} mark {}", handle.0, slot.obj.kind_name());

        self.gray.push(handle);
    }

    /// Drain the gray worklist, blackening each object by graying its
    /// referents.
    pub fn trace_references(&mut self) {
        while let Some(handle) = self.gray.pop() {
            self.blacken(handle);
        }
    }

    fn blacken(&mut self, handle: ObjHandle) {
        // Gather the outgoing edges first; marking mutates the arena.
        let mut children: Vec<Value> = Vec::new();
        match self.get(handle) {
            Obj::Str(_) | Obj::Native(_) => {}
            Obj::Function(function) => {
                if let Some(name) = function.name {
                    children.push(Value::Obj(name));
                }
                children.extend(function.chunk.constants.iter().copied());
            }
            Obj::Closure(closure) => {
                children.push(Value::Obj(closure.function));
                children.extend(closure.upvalues.iter().map(|&u| Value::Obj(u)));
            }
            Obj::Upvalue(upvalue) => match upvalue {
                UpvalueObj::Closed(value) => children.push(*value),
                UpvalueObj::Open(_) => {}
            },
            Obj::Class(class) => {
                children.push(Value::Obj(class.name));
                for (key, value) in class.methods.iter() {
                    children.push(Value::Obj(key));
                    children.push(value);
                }
            }
            Obj::Instance(instance) => {
                children.push(Value::Obj(instance.class));
                for (key, value) in instance.fields.iter() {
                    children.push(Value::Obj(key));
                    children.push(value);
                }
            }
            Obj::BoundMethod(bound) => {
                children.push(bound.receiver);
                children.push(Value::Obj(bound.method));
            }
        }
        for child in children {
            self.mark_value(child);
        }
    }

    /// Drop intern entries for strings the trace did not reach.
    ///
    /// Must run between tracing and sweeping: the table's keys are weak,
    /// and the sweep is about to free the unmarked ones.
    pub fn remove_white_strings(&mut self) {
        let slots = &self.slots;
        self.strings
            .remove_white(|key| matches!(&slots[key.index()], Some(slot) if slot.marked));
    }

    /// Free every unmarked object and clear survivors' marks.
    /// Returns the number of objects freed.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (index, entry) in self.slots.iter_mut().enumerate() {
            match entry {
                Some(slot) if slot.marked => slot.marked = false,
                Some(slot) => {
                    #[cfg(feature = "gc-log")]
                    eprintln!("{:>4} free {}", index, slot.obj.kind_name());

                    self.bytes_allocated -= slot.size;
                    *entry = None;
                    self.free.push(index as u32);
                    freed += 1;
                }
                None => {}
            }
        }
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
        freed
    }

    /// Number of live objects. Exposed for tests and GC statistics.
    pub fn object_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Bytes currently attributed to live objects.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    // =========================================================================
    // Formatting
    // =========================================================================

    /// Render a value the way `print` does.
    pub fn value_to_string(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::Obj(handle) => match self.get(handle) {
                Obj::Str(s) => s.chars.to_string(),
                Obj::Function(f) => match f.name {
                    Some(name) => format!("<fn {}>", self.as_str(name)),
                    None => "<script>".to_string(),
                },
                Obj::Native(_) => "<native fn>".to_string(),
                Obj::Closure(c) => self.value_to_string(Value::Obj(c.function)),
                Obj::Upvalue(_) => "upvalue".to_string(),
                Obj::Class(c) => self.as_str(c.name).to_string(),
                Obj::Instance(i) => {
                    format!("{} instance", self.as_str(self.class(i.class).name))
                }
                Obj::BoundMethod(b) => self.value_to_string(Value::Obj(b.method)),
            },
        }
    }

    /// Kind name of a value, for error messages.
    pub fn type_name(&self, value: Value) -> &'static str {
        match value {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Obj(handle) => self.get(handle).kind_name(),
        }
    }

    /// Convenience for allocating a string value from a Rust string.
    pub fn intern_value(&mut self, s: &str) -> Value {
        Value::Obj(self.intern(s))
    }

    /// Allocate a native function object.
    pub fn alloc_native(
        &mut self,
        name: &'static str,
        function: Rc<dyn Fn(&[Value]) -> Value>,
    ) -> ObjHandle {
        self.alloc(Obj::Native(NativeObj { name, function }))
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Approximate retained size of an object, for the collection schedule.
fn obj_size(obj: &Obj) -> usize {
    let payload = match obj {
        Obj::Str(s) => s.chars.len(),
        Obj::Function(f) => {
            f.chunk.code.len() * mem::size_of::<crate::opcode::OpCode>()
                + f.chunk.constants.len() * mem::size_of::<Value>()
                + f.chunk.lines.len() * mem::size_of::<u32>()
        }
        Obj::Closure(c) => c.upvalues.len() * mem::size_of::<ObjHandle>(),
        Obj::Class(c) => c.methods.len() * mem::size_of::<Value>() * 2,
        Obj::Instance(i) => i.fields.len() * mem::size_of::<Value>() * 2,
        Obj::Native(_) | Obj::Upvalue(_) | Obj::BoundMethod(_) => 0,
    };
    mem::size_of::<Obj>() + payload
}

// Keep the leaf-object constructors close to the heap so allocation sites
// read uniformly in the VM.
impl Heap {
    pub fn alloc_closure(&mut self, function: ObjHandle) -> ObjHandle {
        let upvalue_count = self.function(function).upvalue_count as usize;
        self.alloc(Obj::Closure(ClosureObj {
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        }))
    }

    pub fn alloc_upvalue(&mut self, slot: usize) -> ObjHandle {
        self.alloc(Obj::Upvalue(UpvalueObj::Open(slot)))
    }

    pub fn alloc_class(&mut self, name: ObjHandle) -> ObjHandle {
        self.alloc(Obj::Class(ClassObj {
            name,
            methods: Table::new(),
        }))
    }

    pub fn alloc_instance(&mut self, class: ObjHandle) -> ObjHandle {
        self.alloc(Obj::Instance(InstanceObj {
            class,
            fields: Table::new(),
        }))
    }

    pub fn alloc_bound_method(&mut self, receiver: Value, method: ObjHandle) -> ObjHandle {
        self.alloc(Obj::BoundMethod(BoundMethodObj { receiver, method }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_dedups() {
        let mut heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        let c = heap.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.object_count(), 2);
    }

    #[test]
    fn test_collect_frees_unreachable() {
        let mut heap = Heap::new();
        let keep = heap.intern("keep");
        let _drop = heap.intern("drop");
        assert_eq!(heap.object_count(), 2);

        heap.mark_object(keep);
        heap.trace_references();
        heap.remove_white_strings();
        let freed = heap.sweep();

        assert_eq!(freed, 1);
        assert_eq!(heap.object_count(), 1);
        assert_eq!(heap.as_str(keep), "keep");
    }

    #[test]
    fn test_dead_string_can_be_reinterned() {
        let mut heap = Heap::new();
        let first = heap.intern("transient");
        heap.trace_references();
        heap.remove_white_strings();
        heap.sweep();

        // The slot was freed and the intern entry tombstoned; a fresh
        // intern must produce a live string again, possibly reusing the slot.
        let second = heap.intern("transient");
        assert_eq!(heap.as_str(second), "transient");
        let _ = first; // old handle is dead; nothing dereferences it
    }

    #[test]
    fn test_second_collection_is_fixed_point() {
        let mut heap = Heap::new();
        let root = heap.intern("root");
        for i in 0..10 {
            heap.intern(&format!("garbage-{}", i));
        }

        heap.mark_object(root);
        heap.trace_references();
        heap.remove_white_strings();
        let first = heap.sweep();
        assert_eq!(first, 10);

        heap.mark_object(root);
        heap.trace_references();
        heap.remove_white_strings();
        let second = heap.sweep();
        assert_eq!(second, 0);
    }

    #[test]
    fn test_slot_reuse() {
        let mut heap = Heap::new();
        let dead = heap.intern("dead");
        let dead_index = dead.index();
        heap.trace_references();
        heap.remove_white_strings();
        heap.sweep();

        let fresh = heap.intern("fresh");
        assert_eq!(fresh.index(), dead_index);
    }
}
