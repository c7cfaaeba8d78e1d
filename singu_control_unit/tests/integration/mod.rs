mod frame_loss;
mod planner_properties;
mod safety_sequences;
