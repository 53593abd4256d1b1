use crate::{
    object::ObjectTable,
    value::{ObjectRef, Value},
};

/// A labelled edge reported by a diagnostic [`Tracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub path: String,
    pub object: ObjectRef,
}

/// Handle given to every trace callback.
///
/// During a collection the tracer marks reported objects and queues them for scanning. Outside of
/// a collection, a tracer created with [`Tracer::visitor`] reports every edge along with the
/// slash-separated path of labels that led to it, which is how root dumps and coverage checks are
/// produced.
///
/// Trace callbacks must only report edges. They must not allocate, touch the root set, or read
/// objects through the [`Context`](crate::Context).
pub struct Tracer<'a> {
    mode: Mode<'a>,
    path: Vec<String>,
}

enum Mode<'a> {
    Mark {
        table: &'a mut ObjectTable,
        gray: &'a mut Vec<ObjectRef>,
    },
    Validate {
        table: &'a ObjectTable,
        invalid: &'a mut Vec<ObjectRef>,
    },
    Visit(&'a mut dyn FnMut(Edge)),
}

impl<'a> Tracer<'a> {
    /// A tracer that calls `visit` for every reported edge instead of marking anything.
    pub fn visitor(visit: &'a mut dyn FnMut(Edge)) -> Tracer<'a> {
        Tracer {
            mode: Mode::Visit(visit),
            path: Vec::new(),
        }
    }

    pub(crate) fn marker(table: &'a mut ObjectTable, gray: &'a mut Vec<ObjectRef>) -> Tracer<'a> {
        Tracer {
            mode: Mode::Mark { table, gray },
            path: Vec::new(),
        }
    }

    pub(crate) fn validator(table: &'a ObjectTable, invalid: &'a mut Vec<ObjectRef>) -> Tracer<'a> {
        Tracer {
            mode: Mode::Validate { table, invalid },
            path: Vec::new(),
        }
    }

    /// Returns true if this tracer is marking objects for a collection.
    pub fn is_marking(&self) -> bool {
        matches!(self.mode, Mode::Mark { .. })
    }

    /// Report an edge to `obj`.
    pub fn edge(&mut self, obj: ObjectRef, name: &str) {
        match &mut self.mode {
            Mode::Mark { table, gray } => match table.get_mut(obj) {
                Some(object) => {
                    if !object.marked {
                        object.marked = true;
                        gray.push(obj);
                    }
                }
                None => debug_assert!(false, "traced a dangling object handle {obj} ({name})"),
            },
            Mode::Validate { table, invalid } => {
                if table.get(obj).is_none() {
                    invalid.push(obj);
                }
            }
            Mode::Visit(visit) => {
                let mut path = self.path.join("/");
                if !path.is_empty() {
                    path.push('/');
                }
                path.push_str(name);
                visit(Edge { path, object: obj });
            }
        }
    }

    /// Report an edge for `value` if it refers to an object, otherwise do nothing.
    pub fn value(&mut self, value: &Value, name: &str) {
        if let Value::Object(obj) = *value {
            self.edge(obj, name);
        }
    }

    /// Run `f` with `name` pushed onto the label path.
    ///
    /// Only diagnostic tracers keep the path, so this costs nothing during a collection.
    pub fn scope<R>(&mut self, name: &str, f: impl FnOnce(&mut Self) -> R) -> R {
        if let Mode::Visit(_) = self.mode {
            self.path.push(name.to_owned());
            let r = f(self);
            self.path.pop();
            r
        } else {
            f(self)
        }
    }

    /// Like [`Tracer::scope`], labelling the nested traversal with a sequence index.
    pub fn scope_index<R>(&mut self, index: usize, f: impl FnOnce(&mut Self) -> R) -> R {
        if let Mode::Visit(_) = self.mode {
            self.path.push(index.to_string());
            let r = f(self);
            self.path.pop();
            r
        } else {
            f(self)
        }
    }
}

/// Handle given to sweep hooks, answering which objects the current collection is about to free.
pub struct Sweeper<'a> {
    table: &'a ObjectTable,
}

impl<'a> Sweeper<'a> {
    pub(crate) fn new(table: &'a ObjectTable) -> Sweeper<'a> {
        Sweeper { table }
    }

    /// Returns true if `obj` was not reached by the finished mark phase, or is already gone.
    pub fn is_dying(&self, obj: ObjectRef) -> bool {
        match self.table.get(obj) {
            Some(object) => !object.marked,
            None => true,
        }
    }
}
