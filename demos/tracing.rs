use std::{cell::RefCell, rc::Rc, sync::Arc};

use anyhow::{ensure, Context as _};
use clap::{crate_authors, crate_description, crate_version, value_parser, Arg, ArgAction, Command};
use tether::{
    edges_of,
    gc::{Context, Parameters, Phase, Tracer, Value},
    impl_trace, rooted, Heap, HostClass, HostObject, PersistentRooted, Slot, Trace, TracePolicy,
};

struct Collector {
    cx: Context,
    incremental: bool,
}

impl Collector {
    fn collect(&self) {
        if self.incremental {
            let mut slices = 1;
            while self.cx.collect_slice() != Phase::Sleep {
                slices += 1;
            }
            println!("  collected in {slices} slices, {} live", self.cx.live_objects());
        } else {
            self.cx.collect();
            println!("  collected, {} live", self.cx.live_objects());
        }
    }
}

// A native aggregate holding both a single value and a sequence of values.
struct SafeBox {
    head: Heap<Value>,
    list: Vec<Heap<Value>>,
}

impl_trace!(SafeBox { head, list });

fn custom_type_on_stack(c: &Collector) -> anyhow::Result<()> {
    println!("custom traceable type on the stack");
    let cx = &c.cx;

    let head = cx.new_object(vec![Value::Integer(0)])?;
    rooted!(in(cx) let safe = Box::new(SafeBox {
        head: Heap::new(cx, head.into()),
        list: Vec::new(),
    }));
    for i in 1..=3 {
        let obj = cx.new_object(vec![Value::Integer(i)])?;
        safe.borrow_mut().list.push(Heap::new(cx, obj.into()));
    }
    c.collect();

    for edge in edges_of(&**safe.borrow()) {
        println!("  {} -> {}", edge.path, edge.object);
    }
    ensure!(safe.is_valid(), "rooted aggregate lost a value");
    Ok(())
}

// A shared pointer type that does not implement `Trace`, rooted through a policy.
struct Shared(Vec<Value>);

struct SharedPolicy;

impl TracePolicy<Option<Arc<Shared>>> for SharedPolicy {
    fn trace(trc: &mut Tracer<'_>, value: &Option<Arc<Shared>>, name: &str) {
        if let Some(shared) = value {
            trc.scope(name, |trc| shared.0.trace(trc));
        }
    }
}

fn extension_policy(c: &Collector) -> anyhow::Result<()> {
    println!("extension policy for a foreign shared pointer");
    let cx = &c.cx;

    rooted!(in(cx) let shared: Option<Arc<Shared>> = None, policy = SharedPolicy);
    c.collect();

    let obj = cx.new_object(Vec::new())?;
    shared.set(Some(Arc::new(Shared(vec![obj.into()]))));
    c.collect();
    ensure!(cx.is_alive(obj), "shared value was collected");
    println!("  {obj} survived behind the policy");
    Ok(())
}

thread_local! {
    static LAST_RESULT: RefCell<PersistentRooted<Value>> =
        const { RefCell::new(PersistentRooted::new()) };
}

fn global_roots(c: &Collector) -> anyhow::Result<()> {
    println!("global persistent roots");
    let cx = &c.cx;

    let obj = cx.new_object(vec![Value::Boolean(true)])?;
    LAST_RESULT.with_borrow_mut(|root| root.init(cx, obj.into()));
    c.collect();
    ensure!(cx.is_alive(obj), "global root did not keep its value");

    LAST_RESULT.with_borrow_mut(|root| root.reset());
    c.collect();
    ensure!(!cx.is_alive(obj), "reset global root still keeps its value");
    println!("  {obj} was released after reset");
    Ok(())
}

// A host struct that owns persistent roots for as long as it lives.
struct Interpreter {
    globals: PersistentRooted<Vec<Value>>,
    scratch: PersistentRooted<Box<SafeBox>>,
}

impl Interpreter {
    fn new(cx: &Context) -> Interpreter {
        let mut globals: PersistentRooted<Vec<Value>> = PersistentRooted::new();
        globals.emplace(cx);
        let mut scratch: PersistentRooted<Box<SafeBox>> = PersistentRooted::new();
        scratch.emplace_with(cx, || {
            Box::new(SafeBox {
                head: Heap::new(cx, Value::Null),
                list: Vec::new(),
            })
        });
        Interpreter { globals, scratch }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.globals.reset();
        self.scratch.reset();
    }
}

fn embedded_roots(c: &Collector) -> anyhow::Result<()> {
    println!("roots embedded in a host struct");
    let cx = &c.cx;

    let interp = Interpreter::new(cx);
    let global = cx.new_object(Vec::new())?;
    let scratch = cx.new_object(Vec::new())?;
    interp.globals.borrow_mut().push(global.into());
    interp.scratch.borrow_mut().head.set(scratch.into());
    c.collect();
    ensure!(
        cx.is_alive(global) && cx.is_alive(scratch),
        "embedded roots lost a value"
    );

    drop(interp);
    c.collect();
    ensure!(!cx.is_alive(global), "dropped interpreter still roots its globals");
    println!("  {global} and {scratch} were released with the interpreter");
    Ok(())
}

struct Counter {
    count: Heap<Value>,
}

impl_trace!(Counter { count });

impl Drop for Counter {
    fn drop(&mut self) {
        println!("  releasing counter at {:?}", self.count.get());
    }
}

struct CounterPair;

impl HostClass for CounterPair {
    const NAME: &'static str = "CounterPair";
    const SLOT_COUNT: usize = 2;
    type Native = Counter;
}

fn host_object(c: &Collector) -> anyhow::Result<()> {
    println!("host object with owned and unowned slots");
    let cx = &c.cx;

    let borrowed = Rc::new(Counter {
        count: Heap::new(cx, Value::Integer(2)),
    });
    let pair = HostObject::<CounterPair>::create(
        cx,
        vec![
            Slot::owned(Counter {
                count: Heap::new(cx, Value::Integer(1)),
            }),
            Slot::unowned(&borrowed),
        ],
    )?;

    {
        rooted!(in(cx) let _pair = pair);
        c.collect();
        let count = pair
            .with_slot(cx, 0, |counter| counter.map(|counter| *counter.count.get()))?
            .context("owned slot is empty")?;
        println!("  owned slot holds {count:?}, object is {:?}", cx.liveness(pair.as_object()));
    }

    c.collect();
    println!("  object is {:?}", cx.liveness(pair.as_object()));
    println!("  unowned counter still at {:?}", borrowed.count.get());
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let matches = Command::new("tracing-bridge")
        .version(crate_version!())
        .about(crate_description!())
        .author(crate_authors!(", "))
        .arg(
            Arg::new("incremental")
                .short('i')
                .long("incremental")
                .action(ArgAction::SetTrue)
                .help("Collect in incremental slices instead of all at once"),
        )
        .arg(
            Arg::new("slice-budget")
                .long("slice-budget")
                .value_parser(value_parser!(usize))
                .default_value("64")
                .help("Number of objects marked per incremental slice"),
        )
        .get_matches();

    let slice_budget = matches
        .get_one::<usize>("slice-budget")
        .copied()
        .context("missing slice budget")?;
    ensure!(slice_budget >= 1, "slice budget must be at least 1");

    let collector = Collector {
        cx: Context::new(Parameters::default().set_slice_budget(slice_budget)),
        incremental: matches.get_flag("incremental"),
    };

    custom_type_on_stack(&collector)?;
    extension_policy(&collector)?;
    global_roots(&collector)?;
    embedded_roots(&collector)?;
    host_object(&collector)?;

    collector.cx.teardown();
    Ok(())
}
