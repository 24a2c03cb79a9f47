mod catalog;
mod intervals;
mod readings;
mod vehicle_states;
