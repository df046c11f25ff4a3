// Bounded containers shared by the tracker and the state machines

mod ring_buffer;

pub use ring_buffer::RingBuffer;
