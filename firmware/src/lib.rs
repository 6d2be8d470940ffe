#![no_std]

pub mod battery;
pub mod clock;
pub mod net;
pub mod portal;
pub mod retained;
pub mod storage;
