//! Shared schema and value builders for the codec fuzz targets.
//!
//! `Root` nests every shape the codec handles: optional strings, boxed
//! structs, a strict union wrapping a flexible one, a table holding a union
//! and a vector of structs, a bounded vector, an array and an optional handle.

use fathom_codec::{TableValue, Value};
use fathom_schema::{Library, LibraryBuilder, Strictness, Type};
use fathom_wire::{Handle, HandleInfo, ObjectType, Rights};

pub const ROOT: &str = "Root";

const NAME_MAX: u32 = 32;
const TAGS_MAX: u32 = 8;

pub fn library() -> Library {
    let mut builder = LibraryBuilder::new("fuzz.codec");
    builder
        .add_struct("Leaf")
        .member("flag", Type::bool())
        .member("count", Type::i32());
    builder
        .add_union("Choice", Strictness::Flexible)
        .member(1, "name", Type::bounded_string(NAME_MAX))
        .member(2, "leaf", Type::named("Leaf"))
        .member(3, "numbers", Type::vector(Type::u16()));
    builder
        .add_union("Pick", Strictness::Strict)
        .member(1, "small", Type::u8())
        .member(2, "choice", Type::named("Choice"));
    builder
        .add_table("Extras")
        .member(1, "label", Type::string())
        .member(2, "choice", Type::named("Choice"))
        .member(3, "leaves", Type::vector(Type::named("Leaf")));
    builder
        .add_struct("Root")
        .member("id", Type::u64())
        .member("label", Type::string().optional())
        .member("pick", Type::named("Pick").optional())
        .member("extras", Type::named("Extras"))
        .member("leaf", Type::named("Leaf").optional())
        .member("tags", Type::bounded_vector(Type::string(), TAGS_MAX))
        .member("blob", Type::array(Type::u8(), 4))
        .member("token", token_type());
    match builder.build() {
        Ok(library) => library,
        Err(err) => panic!("fuzz library is invalid: {err}"),
    }
}

fn token_type() -> Type {
    Type::handle(ObjectType::Event, Rights::WAIT | Rights::TRANSFER).optional()
}

/// A handle that satisfies the `token` declaration.
pub fn event_handle() -> HandleInfo {
    HandleInfo::new(Handle::new(), ObjectType::Event, Rights::BASIC)
}

/// Generated input for a `Leaf`.
pub type LeafSeed = (bool, i32);

/// Generated input for a `Choice`: a selector and one payload per variant.
pub type ChoiceSeed = (u8, String, LeafSeed, Vec<u16>);

/// Generated input for a whole `Root` value.
pub type Sample = (
    (u64, Option<String>),
    Option<(bool, u8, ChoiceSeed)>,
    (Option<String>, Option<ChoiceSeed>, Vec<LeafSeed>),
    Option<LeafSeed>,
    (Vec<String>, u32, bool),
);

/// Shape a generated sample into a `Root` value the schema accepts.
pub fn root(sample: Sample) -> Value {
    let (head, pick, extras_seed, boxed, rest) = sample;
    let (id, label) = head;
    let (extra_label, extra_choice, leaves) = extras_seed;
    let (mut tags, blob, token) = rest;
    tags.truncate(TAGS_MAX as usize);

    let pick = match pick {
        None => Value::Null,
        Some((true, small, _)) => Value::union(1, Value::U8(small)),
        Some((false, _, seed)) => Value::union(2, choice(seed)),
    };

    let mut extras = TableValue::new();
    if let Some(label) = extra_label {
        extras = extras.with(1, Value::String(label));
    }
    if let Some(seed) = extra_choice {
        extras = extras.with(2, choice(seed));
    }
    if !leaves.is_empty() {
        extras = extras.with(3, Value::Vector(leaves.into_iter().map(leaf).collect()));
    }

    Value::Struct(vec![
        Value::U64(id),
        label.map_or(Value::Null, Value::String),
        pick,
        Value::Table(extras),
        boxed.map_or(Value::Null, leaf),
        Value::Vector(tags.into_iter().map(Value::String).collect()),
        Value::Array(blob.to_le_bytes().into_iter().map(Value::U8).collect()),
        if token {
            Value::Handle(event_handle())
        } else {
            Value::Null
        },
    ])
}

fn leaf((flag, count): LeafSeed) -> Value {
    Value::Struct(vec![Value::Bool(flag), Value::I32(count)])
}

fn choice((which, name, leaf_seed, numbers): ChoiceSeed) -> Value {
    match which % 3 {
        0 => Value::union(1, Value::String(truncate(name, NAME_MAX as usize))),
        1 => Value::union(2, leaf(leaf_seed)),
        _ => {
            let numbers = numbers.into_iter().map(Value::U16).collect();
            Value::union(3, Value::Vector(numbers))
        }
    }
}

fn truncate(mut text: String, max: usize) -> String {
    while text.len() > max {
        text.pop();
    }
    text
}
