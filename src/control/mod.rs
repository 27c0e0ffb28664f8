//! Control path of one actuator: transmission lookup, assistance profile,
//! torque/current conversion, thermal model, zeroing and the 1 kHz loop itself.

pub mod actuator_loop;
pub mod current;
pub mod profile;
pub mod thermal;
pub mod transmission;
pub mod zeroing;
