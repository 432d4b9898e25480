/// Execute an aggregate command in place (decide, then evolve).
///
/// 1. `aggregate.handle(command)` decides the events without mutating state
/// 2. each event is applied via `aggregate.apply(event)`
///
/// No persistence or publication happens here; the infrastructure dispatcher
/// wraps this same lifecycle with an event store. Domain tests use it directly.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: stockflow_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
